use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use streamhost_wire::ServerId;
use uuid::Uuid;

use crate::error::{HostError, HostResult};

const SERVER_ID_FILE: &str = "server_id";

/// Persistent per-machine server identity.
///
/// The id is generated once per host (a v4 UUID rendered as 32 lowercase hex
/// characters), stored under the per-user config directory, and loaded once
/// at construction. Two processes racing the first creation both end up with
/// the first writer's value: creation goes through a temp file and an atomic
/// no-clobber rename, and the loser re-reads the winner's file.
pub struct ServerIdentityStore {
    server_id: ServerId,
}

impl ServerIdentityStore {
    /// Opens the store at the well-known per-user location.
    pub fn open() -> HostResult<Self> {
        let dirs = ProjectDirs::from("com", "streamhost", "streamhost").ok_or_else(|| {
            HostError::invalid_configuration("no home directory to store the server identity in")
        })?;
        Self::open_at(dirs.config_dir())
    }

    /// Opens the store rooted at an explicit directory.
    pub fn open_at(dir: &Path) -> HostResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(SERVER_ID_FILE);

        if let Some(existing) = read_valid_id(&path) {
            return Ok(Self {
                server_id: existing,
            });
        }

        let generated = ServerId::parse(&Uuid::new_v4().simple().to_string())?;
        let written = persist_first_writer_wins(&path, &generated)?;
        Ok(Self { server_id: written })
    }

    /// The cached identity; stable for the lifetime of the host.
    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }
}

fn read_valid_id(path: &Path) -> Option<ServerId> {
    let contents = fs::read_to_string(path).ok()?;
    ServerId::parse(contents.trim()).ok()
}

fn persist_first_writer_wins(path: &Path, generated: &ServerId) -> HostResult<ServerId> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    fs::write(temp.path(), generated.as_str())?;

    match temp.persist_noclobber(path) {
        Ok(_) => Ok(generated.clone()),
        Err(_) => {
            // Somebody else won the race; their value is authoritative.
            read_valid_id(path).map(Ok).unwrap_or_else(|| {
                // The competing write was torn or invalid; replace it.
                let temp = tempfile::NamedTempFile::new_in(dir)?;
                fs::write(temp.path(), generated.as_str())?;
                temp.persist(path)
                    .map_err(|err| HostError::Io(err.error))?;
                Ok(generated.clone())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_open_generates_a_32_hex_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ServerIdentityStore::open_at(dir.path()).unwrap();
        let id = store.server_id().as_str();
        assert_eq!(id.len(), 32);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn reopening_returns_the_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let first = ServerIdentityStore::open_at(dir.path()).unwrap();
        let second = ServerIdentityStore::open_at(dir.path()).unwrap();
        assert_eq!(first.server_id(), second.server_id());
    }

    #[test]
    fn corrupt_file_is_replaced_with_a_fresh_id() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SERVER_ID_FILE), "not hex at all").unwrap();
        let store = ServerIdentityStore::open_at(dir.path()).unwrap();
        assert_eq!(store.server_id().as_str().len(), 32);
    }

    #[test]
    fn racing_creations_agree_on_one_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    ServerIdentityStore::open_at(&path)
                        .unwrap()
                        .server_id()
                        .clone()
                })
            })
            .collect();

        let ids: Vec<ServerId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let on_disk = read_valid_id(&path.join(SERVER_ID_FILE)).unwrap();
        assert!(ids.iter().all(|id| *id == on_disk));

        let reopened = ServerIdentityStore::open_at(&path).unwrap();
        assert_eq!(*reopened.server_id(), on_disk);
    }
}
