//! Proptest generators for property-based testing.

use proptest::prelude::*;

use lockbox_core::{ContentKey, FileName, Keypair, UserId};

/// Generate a random key pair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random content key.
pub fn content_key() -> impl Strategy<Value = ContentKey> {
    any::<[u8; 32]>().prop_map(ContentKey::from_bytes)
}

/// Generate a valid user id.
pub fn user_id() -> impl Strategy<Value = UserId> {
    "[a-z][a-z0-9_.-]{0,31}".prop_filter_map("valid user id", |s| UserId::new(s).ok())
}

/// Generate a valid file name, including spaces and unicode.
pub fn file_name() -> impl Strategy<Value = FileName> {
    "[a-zA-Z0-9 ._\u{e9}\u{4e2d}-]{1,64}".prop_filter_map("valid file name", |s| {
        FileName::new(s).ok()
    })
}

/// Generate plaintext bytes of at most `max_len`, including empty.
pub fn plaintext(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate `count` distinct user ids.
pub fn distinct_users(count: usize) -> impl Strategy<Value = Vec<UserId>> {
    prop::collection::btree_set(user_id(), count).prop_map(|set| set.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_names_roundtrip_through_string(user in user_id(), name in file_name()) {
            prop_assert_eq!(UserId::new(user.as_str()).unwrap(), user);
            prop_assert_eq!(FileName::new(name.as_str()).unwrap(), name);
        }

        #[test]
        fn distinct_users_are_distinct(users in distinct_users(4)) {
            let mut sorted = users.clone();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), 4);
        }
    }
}
