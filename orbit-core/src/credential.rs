use std::fmt;
use zeroize::Zeroize;

/// Pre-shared-key identity, typically `device-id@project-id`.
#[derive(Clone)]
pub struct PskCredential {
    pub identity: String,
    secret: Vec<u8>,
}

impl PskCredential {
    pub fn new(identity: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        PskCredential {
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl Drop for PskCredential {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl fmt::Debug for PskCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PskCredential")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// X.509 credential set: CA certificate, client certificate, and client private key,
/// all PEM or DER bytes as the transport expects.
#[derive(Clone)]
pub struct X509Credential {
    pub ca_cert: Vec<u8>,
    pub client_cert: Vec<u8>,
    client_key: Vec<u8>,
}

impl X509Credential {
    pub fn new(ca_cert: Vec<u8>, client_cert: Vec<u8>, client_key: Vec<u8>) -> Self {
        X509Credential {
            ca_cert,
            client_cert,
            client_key,
        }
    }

    pub fn client_key(&self) -> &[u8] {
        &self.client_key
    }
}

impl Drop for X509Credential {
    fn drop(&mut self) {
        self.client_key.zeroize();
    }
}

impl fmt::Debug for X509Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X509Credential")
            .field("ca_cert_len", &self.ca_cert.len())
            .field("client_cert_len", &self.client_cert.len())
            .field("client_key", &"<redacted>")
            .finish()
    }
}

/// Caller-owned credential handed to `Client::create`. Must outlive the client.
#[derive(Debug, Clone)]
pub enum Credential {
    Psk(PskCredential),
    X509(X509Credential),
}

impl Credential {
    pub fn psk(identity: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Credential::Psk(PskCredential::new(identity, secret))
    }

    pub fn x509(ca_cert: Vec<u8>, client_cert: Vec<u8>, client_key: Vec<u8>) -> Self {
        Credential::X509(X509Credential::new(ca_cert, client_cert, client_key))
    }
}
