//! The remote-store capability the daemon talks to.
//!
//! Everything the daemon needs from a cloud account goes through
//! [`RemoteStore`]. Folder creation with reuse is layered on top as the free
//! function [`create_folder`].

mod mirror;

pub use mirror::{MirrorStore, ROOT_FOLDER_ID};

use crate::error::Error;
use crate::registry::SubfolderRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Authenticated handle returned by [`RemoteStore::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub account: String,
    pub token: String,
}

/// What the store reports back for a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub id: String,
    pub name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

/// Stores disagree on where the display name lives: some give a plain
/// string, others an attribute object with the name under `n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeName {
    Plain(String),
    Attributes(serde_json::Map<String, serde_json::Value>),
    Other(serde_json::Value),
}

impl NodeName {
    pub fn display_name(&self) -> Option<&str> {
        match self {
            NodeName::Plain(name) => Some(name),
            NodeName::Attributes(attrs) => attrs.get("n").and_then(|v| v.as_str()),
            NodeName::Other(_) => None,
        }
    }
}

impl From<&str> for NodeName {
    fn from(name: &str) -> Self {
        NodeName::Plain(name.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub parent_id: String,
    /// Creation time, unix seconds.
    pub created: i64,
    pub kind: NodeKind,
    pub name: NodeName,
    #[serde(default)]
    pub size_bytes: u64,
}

pub trait RemoteStore {
    fn authenticate(&self, account: &str, secret: &str) -> Result<Session, Error>;

    fn upload(
        &self,
        session: &Session,
        local_path: &Path,
        dest_folder_id: &str,
        dest_filename: &str,
    ) -> Result<Receipt, Error>;

    /// Fails with [`Error::NotFound`] when `id` is already gone.
    fn delete(&self, session: &Session, id: &str) -> Result<(), Error>;

    fn list_all_files(&self, session: &Session) -> Result<BTreeMap<String, RemoteFile>, Error>;

    /// Creates a folder and returns its id.
    fn make_dir(&self, session: &Session, name: &str, parent_id: &str) -> Result<String, Error>;
}

impl<T: RemoteStore + ?Sized> RemoteStore for &T {
    fn authenticate(&self, account: &str, secret: &str) -> Result<Session, Error> {
        (**self).authenticate(account, secret)
    }

    fn upload(
        &self,
        session: &Session,
        local_path: &Path,
        dest_folder_id: &str,
        dest_filename: &str,
    ) -> Result<Receipt, Error> {
        (**self).upload(session, local_path, dest_folder_id, dest_filename)
    }

    fn delete(&self, session: &Session, id: &str) -> Result<(), Error> {
        (**self).delete(session, id)
    }

    fn list_all_files(&self, session: &Session) -> Result<BTreeMap<String, RemoteFile>, Error> {
        (**self).list_all_files(session)
    }

    fn make_dir(&self, session: &Session, name: &str, parent_id: &str) -> Result<String, Error> {
        (**self).make_dir(session, name, parent_id)
    }
}

/// Entries whose parent is `folder_id`.
pub fn folder_files<S: RemoteStore + ?Sized>(
    store: &S,
    session: &Session,
    folder_id: &str,
) -> Result<Vec<RemoteFile>, Error> {
    Ok(store
        .list_all_files(session)?
        .into_values()
        .filter(|f| f.parent_id == folder_id)
        .collect())
}

/// Returns the folder `name` under `parent_id`, creating it only when no
/// folder of that name exists there yet.
pub fn create_folder<S: RemoteStore + ?Sized>(
    store: &S,
    session: &Session,
    name: &str,
    parent_id: &str,
) -> Result<SubfolderRecord, Error> {
    let existing = folder_files(store, session, parent_id)?
        .into_iter()
        .find(|f| f.kind == NodeKind::Folder && f.name.display_name() == Some(name));

    let folder_id = match existing {
        Some(folder) => {
            debug!("Reusing remote folder {} ({})", name, folder.id);
            folder.id
        }
        None => store.make_dir(session, name, parent_id)?,
    };

    Ok(SubfolderRecord {
        name: name.to_string(),
        folder_id,
    })
}
