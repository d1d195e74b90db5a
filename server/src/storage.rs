use {
    anyhow::{Context as _, Result, bail, ensure},
    cadd::{ops::Cadd, prelude::IntoType},
    filecrypt_protocol::{ContentRange, FileId},
    filecrypt_sdk::crypto::EncryptedFile,
    fs_err::{OpenOptions, create_dir_all, rename},
    parking_lot::Mutex,
    std::{
        collections::HashMap,
        io::{self, Seek, SeekFrom, Write},
        path::{Path, PathBuf},
        sync::{Arc, Weak},
    },
    tempfile::NamedTempFile,
    tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard},
};

const COMPLETE_EXTENSION: &str = "enc";
const PARTIAL_EXTENSION: &str = "part";
const TOTAL_EXTENSION: &str = "total";

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs_err::remove_file(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Encrypted files on disk.
///
/// Complete files live at `<root>/<file_id>.enc`, unfinished chunked uploads at
/// `<root>/tmp/<file_id>.part`, next to `<root>/tmp/<file_id>.total` holding the size
/// declared by their first chunk.
#[derive(Debug)]
pub struct Storage {
    root: PathBuf,
    tmp: PathBuf,
    locks: Mutex<HashMap<FileId, Weak<AsyncMutex<()>>>>,
}

/// Held while an upload modifies the files of one `file_id`.
pub type FileLock = OwnedMutexGuard<()>;

impl Storage {
    pub fn new(root: PathBuf) -> Result<Self> {
        if !root.try_exists()? {
            bail!("storage root {root:?} doesn't exist");
        }

        let tmp = root.join("tmp");
        create_dir_all(&tmp)?;

        Ok(Self {
            root,
            tmp,
            locks: Mutex::default(),
        })
    }

    fn complete_path(&self, file_id: &FileId) -> PathBuf {
        self.root
            .join(format!("{}.{COMPLETE_EXTENSION}", file_id.as_str()))
    }

    fn partial_path(&self, file_id: &FileId) -> PathBuf {
        self.tmp
            .join(format!("{}.{PARTIAL_EXTENSION}", file_id.as_str()))
    }

    fn total_path(&self, file_id: &FileId) -> PathBuf {
        self.tmp
            .join(format!("{}.{TOTAL_EXTENSION}", file_id.as_str()))
    }

    /// Opens a complete file and reads its header.
    pub fn open(&self, file_id: &FileId) -> io::Result<EncryptedFile> {
        EncryptedFile::open(self.complete_path(file_id))
    }

    pub fn is_complete(&self, file_id: &FileId) -> Result<bool> {
        Ok(self.complete_path(file_id).try_exists()?)
    }

    /// Number of bytes received so far by a chunked upload. Zero if it hasn't started.
    pub fn partial_len(&self, file_id: &FileId) -> Result<u64> {
        match fs_err::metadata(self.partial_path(file_id)) {
            Ok(metadata) => Ok(metadata.len()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    /// Total size declared by the first chunk of an unfinished upload.
    pub fn partial_total(&self, file_id: &FileId) -> Result<Option<u64>> {
        let path = self.total_path(file_id);
        match fs_err::read_to_string(&path) {
            Ok(text) => Ok(Some(
                text.trim()
                    .parse()
                    .with_context(|| format!("invalid total size in {path:?}"))?,
            )),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes `data` at `range.start` of the partial file, discarding anything
    /// that was stored at or after that offset.
    ///
    /// The range must not start beyond [`Self::partial_len`]. A chunk starting at zero
    /// records `range.total` for [`Self::partial_total`]. Returns the new length.
    pub fn write_chunk(
        &self,
        file_id: &FileId,
        range: &ContentRange,
        data: &[u8],
    ) -> Result<u64> {
        ensure!(
            data.len().try_into_type::<u64>()? == range.size(),
            "chunk of {} bytes doesn't fill {range}",
            data.len()
        );
        if range.start == 0 {
            fs_err::write(self.total_path(file_id), range.total.to_string())?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.partial_path(file_id))?;
        let len = file.metadata()?.len();
        ensure!(
            range.start <= len,
            "chunk start {} is beyond partial length {len}",
            range.start
        );
        file.set_len(range.start)?;
        file.seek(SeekFrom::Start(range.start))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(range.start.cadd(range.size())?)
    }

    /// Turns a finished chunked upload into a complete file.
    pub fn commit_partial(&self, file_id: &FileId) -> Result<()> {
        rename(self.partial_path(file_id), self.complete_path(file_id))?;
        remove_if_exists(&self.total_path(file_id))?;
        Ok(())
    }

    /// Stores a file uploaded in a single request, replacing any unfinished chunked upload.
    pub fn store_complete(&self, file_id: &FileId, data: &[u8]) -> Result<()> {
        let mut file = NamedTempFile::new_in(&self.tmp)?;
        file.write_all(data)?;
        file.as_file().sync_data()?;
        let path = self.complete_path(file_id);
        file.persist_noclobber(&path)
            .with_context(|| format!("failed to create {path:?}"))?;
        remove_if_exists(&self.partial_path(file_id))?;
        remove_if_exists(&self.total_path(file_id))?;
        Ok(())
    }

    /// Waits until no other upload is modifying `file_id`.
    pub async fn lock(&self, file_id: &FileId) -> FileLock {
        let mutex = {
            let mut locks = self.locks.lock();
            locks.retain(|_, lock| lock.strong_count() > 0);
            if let Some(mutex) = locks.get(file_id).and_then(Weak::upgrade) {
                mutex
            } else {
                let mutex = Arc::new(AsyncMutex::new(()));
                locks.insert(file_id.clone(), Arc::downgrade(&mutex));
                mutex
            }
        };
        mutex.lock_owned().await
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }
}
