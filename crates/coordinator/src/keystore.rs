//! On-disk persistence for FROST key shares.
//!
//! One JSON file per key set under the node home, written with
//! restrictive permissions and a write-then-rename so a concurrent
//! reader never observes a torn file.
use frostbft_driver::frost_ed25519::keys::{KeyPackage, PublicKeyPackage};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::Result;

/// Serialized form of one key share on disk.
///
/// The secret and public subtrees are the FROST types' own JSON
/// encodings, so the file format is stable across versions of this
/// crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyShareFile {
    /// Key set the share belongs to.
    pub keyset_id: String,
    /// This validator's secret key package.
    pub secret_share: KeyPackage,
    /// The group's public share package.
    pub public_shares: PublicKeyPackage,
}

/// Directory-backed store of persisted key shares.
pub struct KeyShareStore {
    dir: PathBuf,
}

impl KeyShareStore {
    /// Create a store rooted at `dir`. The directory is created lazily
    /// on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the key-share files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, keyset_id: &str) -> PathBuf {
        self.dir.join(format!("{keyset_id}.json"))
    }

    /// Persist a key share, replacing any existing file.
    pub fn save(
        &self,
        keyset_id: &str,
        secret_share: &KeyPackage,
        public_shares: &PublicKeyPackage,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::set_permissions(&self.dir, Permissions::from_mode(0o700))?;

        let file = KeyShareFile {
            keyset_id: keyset_id.to_string(),
            secret_share: secret_share.clone(),
            public_shares: public_shares.clone(),
        };
        let contents = serde_json::to_vec_pretty(&file)?;

        let tmp = self.dir.join(format!(".{keyset_id}.json.tmp"));
        {
            let mut out = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&tmp)?;
            out.write_all(&contents)?;
            out.sync_all()?;
        }
        fs::rename(&tmp, self.path(keyset_id))?;
        Ok(())
    }

    /// Load every parseable key-share file in the directory.
    ///
    /// Unreadable or corrupt entries are skipped with a warning; a
    /// missing directory yields an empty list.
    pub fn load_all(&self) -> Result<Vec<KeyShareFile>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut shares = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }

            let contents = match fs::read(&path) {
                Ok(contents) => contents,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        %err,
                        "skipping unreadable key-share file"
                    );
                    continue;
                }
            };
            match serde_json::from_slice::<KeyShareFile>(&contents) {
                Ok(file) => shares.push(file),
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        %err,
                        "skipping unparseable key-share file"
                    );
                }
            }
        }
        Ok(shares)
    }

    /// Remove a persisted key share. Missing files are not an error.
    pub fn delete(&self, keyset_id: &str) -> Result<()> {
        match fs::remove_file(self.path(keyset_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frostbft_driver::frost_ed25519::keys::{
        generate_with_dealer, IdentifierList,
    };
    use rand::rngs::OsRng;

    fn sample_share() -> (KeyPackage, PublicKeyPackage) {
        let (shares, public) =
            generate_with_dealer(3, 2, IdentifierList::Default, &mut OsRng)
                .unwrap();
        let secret = shares.into_values().next().unwrap();
        (KeyPackage::try_from(secret).unwrap(), public)
    }

    #[test]
    fn save_load_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = KeyShareStore::new(dir.path().join("frost_keys"));
        let (secret, public) = sample_share();

        store.save("keyset-1", &secret, &public)?;
        let loaded = store.load_all()?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].keyset_id, "keyset-1");
        assert_eq!(loaded[0].secret_share, secret);
        assert_eq!(loaded[0].public_shares, public);
        Ok(())
    }

    #[test]
    fn files_have_restrictive_permissions() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = KeyShareStore::new(dir.path().join("frost_keys"));
        let (secret, public) = sample_share();
        store.save("keyset-1", &secret, &public)?;

        let dir_mode = std::fs::metadata(store.dir())?
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);

        let file_mode =
            std::fs::metadata(store.dir().join("keyset-1.json"))?
                .permissions()
                .mode();
        assert_eq!(file_mode & 0o777, 0o600);
        Ok(())
    }

    #[test]
    fn load_all_skips_foreign_and_corrupt_entries() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = KeyShareStore::new(dir.path().join("frost_keys"));
        let (secret, public) = sample_share();
        store.save("keyset-1", &secret, &public)?;

        std::fs::write(store.dir().join("notes.txt"), b"ignore me")?;
        std::fs::write(store.dir().join("broken.json"), b"{not json")?;

        let loaded = store.load_all()?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].keyset_id, "keyset-1");
        Ok(())
    }

    #[test]
    fn missing_directory_is_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = KeyShareStore::new(dir.path().join("nope"));
        assert!(store.load_all()?.is_empty());
        Ok(())
    }

    #[test]
    fn delete_is_idempotent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = KeyShareStore::new(dir.path().join("frost_keys"));
        let (secret, public) = sample_share();
        store.save("keyset-1", &secret, &public)?;

        store.delete("keyset-1")?;
        store.delete("keyset-1")?;
        assert!(store.load_all()?.is_empty());
        Ok(())
    }
}
