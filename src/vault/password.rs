//! Random password generation.

use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;

/// Generate a password of `len` characters drawn uniformly from `[A-Za-z0-9]`
/// using the operating system's random source.
pub fn gen_random_password(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{LISTENER_PASSWORD_LEN, PASSWORD_LEN};

    #[test]
    fn test_password_length_and_charset() {
        let pwd = gen_random_password(PASSWORD_LEN);
        assert_eq!(pwd.len(), PASSWORD_LEN);
        assert!(pwd.chars().all(|c| c.is_ascii_alphanumeric()));

        assert_eq!(gen_random_password(LISTENER_PASSWORD_LEN).len(), 12);
        assert!(gen_random_password(0).is_empty());
    }

    #[test]
    fn test_passwords_differ() {
        assert_ne!(gen_random_password(PASSWORD_LEN), gen_random_password(PASSWORD_LEN));
    }
}
