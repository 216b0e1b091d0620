//! Credential verification for the login dialog.

/// Decides whether a password is acceptable for a player name.
pub trait CredentialVerifier {
    fn verify(&self, name: &str, password: &str) -> bool;
}

/// Placeholder policy: the password is the player's name.
#[derive(Debug, Default, Clone, Copy)]
pub struct NameIsPassword;

impl CredentialVerifier for NameIsPassword {
    fn verify(&self, name: &str, password: &str) -> bool {
        !password.is_empty() && password == name
    }
}

impl<F> CredentialVerifier for F
where
    F: Fn(&str, &str) -> bool,
{
    fn verify(&self, name: &str, password: &str) -> bool {
        self(name, password)
    }
}
