use bincode::{Decode, Encode};
use uuid::Uuid;

/// Stable identity of one replica. Generated once, persisted for the
/// replica's lifetime, attached to every locally-originated change record.
/// Totally ordered so it can serve as the final deterministic tie-break.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Encode, Decode)]
#[repr(transparent)]
pub struct SiteId([u8; 16]);

impl SiteId {
    pub fn new() -> Self {
        SiteId(*Uuid::new_v4().as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        SiteId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl Default for SiteId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SiteId {
    fn from(u: Uuid) -> Self {
        SiteId(*u.as_bytes())
    }
}
impl From<SiteId> for Uuid {
    fn from(s: SiteId) -> Self {
        Uuid::from_bytes(s.0)
    }
}

impl AsRef<[u8]> for SiteId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}
