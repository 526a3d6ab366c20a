//! Principal identity types (spec GLOSSARY "Blessing", "Discharge").
//!
//! The actual cryptographic delegation chain and the third-party-caveat
//! discharge protocol are the TLS/handshake crypto library's concern
//! (spec §1, explicitly out of scope) — the core only needs a value it
//! can compare, log, and hand to an [`Authorizer`].

use std::sync::Arc;

/// A chain of cryptographic delegations identifying a principal,
/// represented here as the set of human-readable names it grants —
/// everything the core's authorization logic actually inspects.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Blessings {
    names: Vec<Arc<str>>,
}

impl Blessings {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names: names.into_iter().map(Arc::from).collect(),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|n| n.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.as_ref() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Proof that a third-party caveat on a blessing is satisfied. Opaque to
/// the core: it is produced and verified by the discharge-issuing
/// service, which lives outside this crate's scope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Discharge(Vec<u8>);

impl Discharge {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Discharge(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Policy-over-context check a dialer runs against a server's presented
/// blessings before trusting it (spec §4.4.1 step 3 "ServerAuthorizer").
pub trait ServerAuthorizer: Send + Sync + 'static {
    fn authorize(&self, blessings: &Blessings) -> bool;
}

/// Accepts any blessing set. Used for reserved-method dispatch (spec
/// §4.7.5 step 4: "Reserved-prefix methods route to the reserved-names
/// dispatcher with `AllowEveryone` authorization").
#[derive(Default, Clone, Copy)]
pub struct AllowEveryone;

impl ServerAuthorizer for AllowEveryone {
    fn authorize(&self, _blessings: &Blessings) -> bool {
        true
    }
}

/// Rejects servers whose blessings don't intersect an allow-list.
#[derive(Clone, Debug)]
pub struct AllowedNames(Vec<String>);

impl AllowedNames {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }
}

impl ServerAuthorizer for AllowedNames {
    fn authorize(&self, blessings: &Blessings) -> bool {
        blessings.names().any(|n| self.0.iter().any(|a| a == n))
    }
}
