use rand::RngCore;

use crate::auth::credentials::CredentialError;

/// bcrypt takes exactly 16 salt bytes; salts are stored as 16 hex characters.
const SALT_LEN: usize = 16;

pub fn hash_password(salt: &str, password: &str) -> Result<String, CredentialError> {
    let salt: [u8; SALT_LEN] = salt
        .as_bytes()
        .try_into()
        .map_err(|_| CredentialError::Malformed(format!("salt must be {SALT_LEN} characters")))?;
    Ok(bcrypt::hash_with_salt(password, bcrypt::DEFAULT_COST, salt)?.to_string())
}

fn gen_random_string(size: usize) -> String {
    let mut rand = rand::rng();
    let mut dest = vec![0; size / 2];

    rand.fill_bytes(&mut dest);
    hex::encode(dest)
}

pub fn gen_salt() -> String {
    gen_random_string(SALT_LEN)
}

pub fn check_password(salt: &str, expected: &str, actual: &str) -> Result<bool, CredentialError> {
    Ok(hash_password(salt, actual)? == expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_check() {
        let salt = gen_salt();
        assert_eq!(salt.len(), SALT_LEN);

        let hash = hash_password(&salt, "pc").unwrap();
        assert!(check_password(&salt, &hash, "pc").unwrap());
        assert!(!check_password(&salt, &hash, "pd").unwrap());
    }

    #[test]
    fn test_short_salt_is_rejected() {
        assert!(matches!(
            hash_password("abc", "pc"),
            Err(CredentialError::Malformed(_))
        ));
    }
}
