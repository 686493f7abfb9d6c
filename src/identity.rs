//! Client registry: signup, credential lookup, and the existence check the
//! booking path depends on.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::limits::*;
use crate::model::{Client, ClientId, Event};
use crate::wal::{Wal, WalWriter};

/// Read side of the identity subsystem, as seen by booking.
pub trait IdentityStore: Send + Sync {
    fn client_exists(&self, id: ClientId) -> bool;
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("email already registered: {0}")]
    EmailTaken(String),
    #[error("invalid email or secret")]
    InvalidCredentials,
    #[error("storage unavailable: {0}")]
    Storage(String),
}

pub struct ClientRegistry {
    clients: DashMap<ClientId, Client>,
    /// Normalized email → client.
    by_email: DashMap<String, ClientId>,
    last_id: AtomicU64,
    /// Serializes signups so the email check and the insert are one step.
    register_lock: Mutex<()>,
    wal: WalWriter,
}

impl ClientRegistry {
    /// Replay `path` and start its WAL writer. Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = WalWriter::spawn(Wal::open(path)?);

        let registry = Self {
            clients: DashMap::new(),
            by_email: DashMap::new(),
            last_id: AtomicU64::new(0),
            register_lock: Mutex::new(()),
            wal,
        };
        for event in events {
            if let Event::ClientRegistered { id, name, email, phone, secret } = event {
                registry.apply(Client { id, name, email, phone, secret });
            }
        }
        Ok(registry)
    }

    fn apply(&self, client: Client) {
        self.last_id.fetch_max(client.id.0, Ordering::SeqCst);
        self.by_email.insert(normalize_email(&client.email), client.id);
        self.clients.insert(client.id, client);
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        phone: &str,
        secret: &str,
    ) -> Result<Client, IdentityError> {
        let name = required("name", name.trim(), MAX_NAME_LEN)?;
        let email = required("email", email.trim(), MAX_EMAIL_LEN)?;
        let phone = required("phone", phone.trim(), MAX_PHONE_LEN)?;
        // Stored exactly as given: login compares it byte for byte.
        let secret = required("secret", secret, MAX_SECRET_LEN)?;

        let _guard = self.register_lock.lock().await;
        if self.by_email.contains_key(&normalize_email(email)) {
            return Err(IdentityError::EmailTaken(email.to_string()));
        }

        let client = Client {
            id: ClientId(self.last_id.load(Ordering::SeqCst) + 1),
            name: name.to_string(),
            email: email.to_string(),
            phone: phone.to_string(),
            secret: secret.to_string(),
        };
        let event = Event::ClientRegistered {
            id: client.id,
            name: client.name.clone(),
            email: client.email.clone(),
            phone: client.phone.clone(),
            secret: client.secret.clone(),
        };
        self.wal
            .append(&event)
            .await
            .map_err(|e| IdentityError::Storage(e.to_string()))?;
        self.apply(client.clone());

        metrics::counter!(crate::observability::CLIENTS_REGISTERED_TOTAL).increment(1);
        info!("registered client {}", client.id);
        Ok(client)
    }

    /// Unknown email and wrong secret are indistinguishable to the caller.
    pub fn verify_credentials(&self, email: &str, secret: &str) -> Result<ClientId, IdentityError> {
        let id = self
            .by_email
            .get(&normalize_email(email))
            .map(|e| *e.value())
            .ok_or(IdentityError::InvalidCredentials)?;
        match self.clients.get(&id) {
            Some(c) if c.secret == secret => Ok(id),
            _ => Err(IdentityError::InvalidCredentials),
        }
    }

    pub fn get(&self, id: ClientId) -> Option<Client> {
        self.clients.get(&id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl IdentityStore for ClientRegistry {
    fn client_exists(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Blank values are missing. `max_len` counts characters, not bytes.
fn required<'a>(field: &'static str, value: &'a str, max_len: usize) -> Result<&'a str, IdentityError> {
    if value.trim().is_empty() {
        return Err(IdentityError::MissingField(field));
    }
    if value.chars().count() > max_len {
        return Err(IdentityError::LimitExceeded(match field {
            "name" => "name too long",
            "email" => "email too long",
            "phone" => "phone too long",
            _ => "secret too long",
        }));
    }
    Ok(value)
}
