//! Represents a file (blob) listed in a user's bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry of a bucket listing.
///
/// Only `name` is guaranteed; the remaining fields are filled in when the
/// storage backend reports them. The struct is handed to the editor template
/// as-is, so field names double as template attributes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoredFile {
    /// Name of the file inside the bucket (also its key).
    pub name: String,

    /// Backend-assigned identifier, if any.
    pub id: Option<String>,

    /// When the file was first stored.
    pub created_at: Option<DateTime<Utc>>,

    /// When the file was last overwritten.
    pub updated_at: Option<DateTime<Utc>>,

    /// Size in bytes.
    pub size: Option<u64>,

    /// Content type (MIME type) as recorded by the backend.
    pub mimetype: Option<String>,
}
