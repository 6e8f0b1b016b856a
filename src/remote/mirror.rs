use super::{NodeKind, NodeName, Receipt, RemoteFile, RemoteStore, Session};
use crate::error::Error;
use chrono::Utc;
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Id of the folder every mirror starts with.
pub const ROOT_FOLDER_ID: &str = "root";

const INDEX_FILE: &str = "nodes.json";
const LOCK_FILE: &str = "nodes.lock";
const KEY_FILE: &str = "session.key";
const BLOB_DIR: &str = "blobs";

/// Process-wide sequence for ids and temp names. Combined with the pid it
/// keeps every writer's names distinct.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// [`RemoteStore`] kept in a local directory: a JSON index of nodes plus one
/// blob file per uploaded file. Useful as an offline target, a staging area
/// on mounted storage, and in tests.
///
/// Several stores, in one process or many, may share a root. Every index
/// change happens under an exclusive lock on `nodes.lock`.
pub struct MirrorStore {
    root: PathBuf,
    credentials: Option<(String, String)>,
    session_key: [u8; 32],
}

impl MirrorStore {
    pub fn open(root: &Path) -> Result<Self, Error> {
        fs::create_dir_all(root.join(BLOB_DIR))
            .map_err(|e| Error::io_context("creating", root, e))?;

        let mut store = Self {
            root: root.to_path_buf(),
            credentials: None,
            session_key: [0; 32],
        };

        let _lock = store.lock()?;
        store.session_key = store.load_or_create_key()?;
        if !store.index_path().exists() {
            let mut nodes = BTreeMap::new();
            nodes.insert(
                ROOT_FOLDER_ID.to_string(),
                RemoteFile {
                    id: ROOT_FOLDER_ID.to_string(),
                    parent_id: String::new(),
                    created: Utc::now().timestamp(),
                    kind: NodeKind::Folder,
                    name: NodeName::from(ROOT_FOLDER_ID),
                    size_bytes: 0,
                },
            );
            store.write_index(&nodes)?;
            debug!("Initialized mirror store at {}", root.display());
        }

        Ok(store)
    }

    /// Only this account/secret pair will authenticate.
    pub fn with_credentials(mut self, account: &str, secret: &str) -> Self {
        self.credentials = Some((account.to_string(), secret.to_string()));
        self
    }

    /// Adds or replaces an entry as-is, bypassing upload.
    pub fn insert(&self, entry: RemoteFile) -> Result<(), Error> {
        self.update(|nodes| {
            nodes.insert(entry.id.clone(), entry);
            Ok(())
        })
    }

    /// Path of the stored bytes for file `id`.
    pub fn blob_path(&self, id: &str) -> PathBuf {
        self.root.join(BLOB_DIR).join(id)
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Blocks until this handle holds the store lock. Dropping the file
    /// releases it.
    fn lock(&self) -> Result<File, Error> {
        let path = self.root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io_context("opening", &path, e))?;
        file.lock_exclusive()
            .map_err(|e| Error::io_context("locking", &path, e))?;
        Ok(file)
    }

    /// Read, change and write back the index while holding the lock.
    fn update<T>(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, RemoteFile>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let _lock = self.lock()?;
        let mut nodes = self.read_index()?;
        let out = change(&mut nodes)?;
        self.write_index(&nodes)?;
        Ok(out)
    }

    fn read_index(&self) -> Result<BTreeMap<String, RemoteFile>, Error> {
        let path = self.index_path();
        let raw = fs::read_to_string(&path).map_err(|e| Error::io_context("reading", &path, e))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))
    }

    fn write_index(&self, nodes: &BTreeMap<String, RemoteFile>) -> Result<(), Error> {
        let path = self.index_path();
        let temp = self.root.join(format!(
            "{}.{}.{}.temp",
            INDEX_FILE,
            process::id(),
            SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ));
        let raw = serde_json::to_string_pretty(nodes)
            .map_err(|e| Error::Parse(format!("serializing index: {}", e)))?;
        if let Err(e) = fs::write(&temp, raw) {
            let _ = fs::remove_file(&temp);
            return Err(Error::io_context("writing", &temp, e));
        }
        fs::rename(&temp, &path).map_err(|e| Error::io_context("replacing", &path, e))
    }

    /// Key sessions are signed with. Created once per root, must be called
    /// with the lock held.
    fn load_or_create_key(&self) -> Result<[u8; 32], Error> {
        let path = self.root.join(KEY_FILE);
        match fs::read_to_string(&path) {
            Ok(raw) => blake3::Hash::from_hex(raw.trim())
                .map(|h| *h.as_bytes())
                .map_err(|e| Error::Parse(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
                let seed = format!("{}|{}|{}", self.root.display(), process::id(), nanos);
                let key = blake3::hash(seed.as_bytes());
                fs::write(&path, key.to_hex().as_str())
                    .map_err(|e| Error::io_context("writing", &path, e))?;
                Ok(*key.as_bytes())
            }
            Err(e) => Err(Error::io_context("reading", &path, e)),
        }
    }

    fn token_for(&self, account: &str) -> String {
        blake3::keyed_hash(&self.session_key, account.as_bytes())
            .to_hex()
            .as_str()[..32]
            .to_string()
    }

    fn check_session(&self, session: &Session) -> Result<(), Error> {
        if session.token != self.token_for(&session.account) {
            return Err(Error::Auth(format!(
                "session for {} is not valid for this store",
                session.account
            )));
        }
        Ok(())
    }

    fn next_id(&self, name: &str, parent_id: &str) -> String {
        let n = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seed = format!(
            "{}|{}|{}|{}|{}",
            parent_id,
            name,
            nanos,
            process::id(),
            n
        );
        blake3::keyed_hash(&self.session_key, seed.as_bytes())
            .to_hex()
            .as_str()[..16]
            .to_string()
    }

    fn require_folder(
        nodes: &BTreeMap<String, RemoteFile>,
        folder_id: &str,
    ) -> Result<(), Error> {
        match nodes.get(folder_id) {
            Some(node) if node.kind == NodeKind::Folder => Ok(()),
            Some(_) => Err(Error::Transfer(format!("{} is not a folder", folder_id))),
            None => Err(Error::Transfer(format!("folder {} not found", folder_id))),
        }
    }
}

impl RemoteStore for MirrorStore {
    fn authenticate(&self, account: &str, secret: &str) -> Result<Session, Error> {
        if account.is_empty() {
            return Err(Error::Auth("no account given".into()));
        }
        if let Some((expected_account, expected_secret)) = &self.credentials {
            if account != expected_account || secret != expected_secret {
                return Err(Error::Auth(format!("credentials rejected for {}", account)));
            }
        }
        Ok(Session {
            account: account.to_string(),
            token: self.token_for(account),
        })
    }

    fn upload(
        &self,
        session: &Session,
        local_path: &Path,
        dest_folder_id: &str,
        dest_filename: &str,
    ) -> Result<Receipt, Error> {
        self.check_session(session)?;

        // Blob ids are unique per writer, so the copy runs outside the lock.
        let id = self.next_id(dest_filename, dest_folder_id);
        let blob = self.blob_path(&id);
        let temp = blob.with_extension("temp");
        let size_bytes = fs::copy(local_path, &temp)
            .and_then(|n| fs::rename(&temp, &blob).map(|_| n))
            .map_err(|e| {
                let _ = fs::remove_file(&temp);
                Error::Transfer(format!("storing {}: {}", local_path.display(), e))
            })?;

        let indexed = self.update(|nodes| {
            Self::require_folder(nodes, dest_folder_id)?;
            nodes.insert(
                id.clone(),
                RemoteFile {
                    id: id.clone(),
                    parent_id: dest_folder_id.to_string(),
                    created: Utc::now().timestamp(),
                    kind: NodeKind::File,
                    name: NodeName::from(dest_filename),
                    size_bytes,
                },
            );
            Ok(())
        });
        if let Err(err) = indexed {
            let _ = fs::remove_file(&blob);
            return Err(err);
        }
        trace!("Stored {} as {}", dest_filename, id);

        Ok(Receipt {
            id,
            name: dest_filename.to_string(),
            size_bytes,
        })
    }

    fn delete(&self, session: &Session, id: &str) -> Result<(), Error> {
        self.check_session(session)?;
        self.update(|nodes| {
            if !nodes.contains_key(id) {
                return Err(Error::NotFound(id.to_string()));
            }

            // Deleting a folder takes its whole subtree with it.
            let mut doomed = vec![id.to_string()];
            let mut i = 0;
            while i < doomed.len() {
                let parent = doomed[i].clone();
                doomed.extend(
                    nodes
                        .values()
                        .filter(|n| n.parent_id == parent)
                        .map(|n| n.id.clone()),
                );
                i += 1;
            }

            for node_id in &doomed {
                if let Some(node) = nodes.remove(node_id) {
                    if node.kind == NodeKind::File {
                        match fs::remove_file(self.blob_path(node_id)) {
                            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                                return Err(Error::Transfer(format!(
                                    "removing blob {}: {}",
                                    node_id, e
                                )))
                            }
                            _ => {}
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn list_all_files(&self, session: &Session) -> Result<BTreeMap<String, RemoteFile>, Error> {
        self.check_session(session)?;
        let _lock = self.lock()?;
        self.read_index()
    }

    fn make_dir(&self, session: &Session, name: &str, parent_id: &str) -> Result<String, Error> {
        self.check_session(session)?;
        let id = self.next_id(name, parent_id);
        self.update(|nodes| {
            Self::require_folder(nodes, parent_id)?;
            nodes.insert(
                id.clone(),
                RemoteFile {
                    id: id.clone(),
                    parent_id: parent_id.to_string(),
                    created: Utc::now().timestamp(),
                    kind: NodeKind::Folder,
                    name: NodeName::from(name),
                    size_bytes: 0,
                },
            );
            Ok(())
        })?;
        debug!("Created remote folder {} ({}) under {}", name, id, parent_id);
        Ok(id)
    }
}
