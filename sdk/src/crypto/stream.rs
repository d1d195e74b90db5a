use {
    super::{
        header::{DATA_NONCE_LENGTH, FileHeader},
        token::{DataKey, FileKey},
    },
    aes::Aes128,
    anyhow::{Context as _, Result},
    cadd::prelude::{Cadd, Cdiv, Crem, Csub, IntoType},
    ctr::cipher::{KeyIvInit, StreamCipher},
    filecrypt_protocol::HEADER_LENGTH,
    fs_err::File,
    std::{
        cmp::{max, min},
        fmt::Display,
        io::{self, Read, Seek, SeekFrom, Write},
        path::{Path, PathBuf},
    },
    tempfile::NamedTempFile,
};

/// AES-128 in counter mode; the upper 8 bytes of the counter block hold the data nonce.
type DataCipher = ctr::Ctr64BE<Aes128>;

/// Cipher block size. Decryption can only start at a multiple of it.
pub const BLOCK_SIZE: usize = 16;

/// Default amount of data encrypted or decrypted at once.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

#[expect(clippy::as_conversions, reason = "widening in a const context")]
const HEADER_OFFSET: u64 = HEADER_LENGTH as u64;
#[expect(clippy::as_conversions, reason = "widening in a const context")]
const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

/// Rounds down to whole cipher blocks, but never below one block.
fn aligned_chunk_size(chunk_size: usize) -> usize {
    max(chunk_size.saturating_sub(chunk_size % BLOCK_SIZE), BLOCK_SIZE)
}

fn invalid_input(err: impl Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, err.to_string())
}

/// Reads up to `size` bytes, stopping early only at end of input.
pub(crate) fn read_chunk(reader: &mut impl Read, size: usize) -> io::Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(size);
    reader
        .take(size.saturating_into_type::<u64>())
        .read_to_end(&mut chunk)?;
    Ok(chunk)
}

impl DataKey {
    fn cipher_at_block(&self, block_index: u64) -> DataCipher {
        let mut counter_block = [0_u8; BLOCK_SIZE];
        let (nonce, counter) = counter_block.split_at_mut(DATA_NONCE_LENGTH);
        nonce.copy_from_slice(&self.nonce);
        counter.copy_from_slice(&block_index.to_be_bytes());
        DataCipher::new(&self.key.into(), &counter_block.into())
    }
}

impl FileKey {
    /// Writes the header and the encrypted content of `input` to `output`.
    ///
    /// `progress` is called with the number of bytes of every chunk right after it's written.
    /// Returns the number of payload bytes.
    #[inline]
    pub fn encrypt(
        &self,
        mut input: impl Read,
        mut output: impl Write,
        chunk_size: usize,
        mut progress: impl FnMut(u64),
    ) -> io::Result<u64> {
        self.header.write_to(&mut output)?;
        let chunk_size = aligned_chunk_size(chunk_size);
        let mut cipher = self.data_key.cipher_at_block(0);
        let mut total = 0_u64;
        loop {
            let mut chunk = read_chunk(&mut input, chunk_size)?;
            if chunk.is_empty() {
                break;
            }
            cipher.apply_keystream(&mut chunk);
            output.write_all(&chunk)?;
            let len = chunk.len().saturating_into_type::<u64>();
            total = total.cadd(len).map_err(io::Error::other)?;
            progress(len);
        }
        output.flush()?;
        Ok(total)
    }

    /// Encrypts `input` into `<output_dir>/<file_id>.enc`.
    ///
    /// The output file only appears once it's complete.
    #[inline]
    pub fn encrypt_file(
        &self,
        input: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        chunk_size: usize,
        progress: impl FnMut(u64),
    ) -> Result<PathBuf> {
        let input_file = File::open(input.as_ref())?;
        let mut output = NamedTempFile::new_in(output_dir.as_ref())?;
        self.encrypt(input_file, output.as_file_mut(), chunk_size, progress)
            .with_context(|| format!("failed to encrypt {:?}", input.as_ref()))?;
        output.as_file().sync_all()?;
        let path = output_dir.as_ref().join(format!("{}.enc", self.file_id));
        output
            .persist_noclobber(&path)
            .with_context(|| format!("failed to create {path:?}"))?;
        Ok(path)
    }
}

/// Lazily decrypts a byte range of an encrypted file, one chunk at a time.
///
/// The sequence is forward-only. Dropping it stops reading immediately.
pub struct DecryptingChunks<R> {
    input: R,
    cipher: DataCipher,
    chunk_size: usize,
    // Bytes of the first block that precede the requested offset.
    skip: usize,
    // Plaintext bytes still to be produced, if the range has an end.
    remaining: Option<u64>,
    finished: bool,
}

impl<R: Read + Seek> DecryptingChunks<R> {
    /// Positions `input` (an encrypted file, header included) at plaintext offset `seek`.
    ///
    /// `end` is the inclusive plaintext offset of the last byte to produce; without it,
    /// the sequence runs to the end of the file.
    #[inline]
    pub fn new(
        mut input: R,
        key: &DataKey,
        seek: u64,
        end: Option<u64>,
        chunk_size: usize,
    ) -> io::Result<Self> {
        let remaining = end
            .map(|end| {
                end.checked_sub(seek)
                    .and_then(|len| len.checked_add(1))
                    .ok_or_else(|| invalid_input(format!("invalid range: {seek}-{end}")))
            })
            .transpose()?;
        let intra_block_offset = seek.crem(BLOCK_SIZE_U64).map_err(invalid_input)?;
        let block_start = seek.csub(intra_block_offset).map_err(invalid_input)?;
        let position = HEADER_OFFSET.cadd(block_start).map_err(invalid_input)?;
        input.seek(SeekFrom::Start(position))?;
        Ok(Self {
            input,
            cipher: key.cipher_at_block(seek.cdiv(BLOCK_SIZE_U64).map_err(invalid_input)?),
            chunk_size: aligned_chunk_size(chunk_size),
            skip: intra_block_offset
                .try_into_type::<usize>()
                .map_err(invalid_input)?,
            remaining,
            finished: false,
        })
    }
}

impl<R: Read> Iterator for DecryptingChunks<R> {
    type Item = io::Result<Vec<u8>>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if self.remaining == Some(0) {
                self.finished = true;
                break;
            }
            let mut chunk = match read_chunk(&mut self.input, self.chunk_size) {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            };
            if chunk.is_empty() {
                self.finished = true;
                break;
            }
            self.cipher.apply_keystream(&mut chunk);

            let skip = min(self.skip, chunk.len());
            chunk.drain(..skip);
            self.skip = self.skip.saturating_sub(skip);

            if let Some(remaining) = &mut self.remaining {
                chunk.truncate((*remaining).saturating_into_type::<usize>());
                *remaining = remaining.saturating_sub(chunk.len().saturating_into_type::<u64>());
            }
            if !chunk.is_empty() {
                return Some(Ok(chunk));
            }
        }
        None
    }
}

/// An encrypted file opened for reading, with its header already parsed.
#[derive(Debug)]
pub struct EncryptedFile {
    file: File,
    header: FileHeader,
    payload_size: u64,
}

impl EncryptedFile {
    /// Fails with `NotFound` if there is no such file
    /// and with `UnexpectedEof` if it's too short to hold a header.
    #[inline]
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        let header = FileHeader::read_from(&mut file)?;
        Ok(Self {
            file,
            header,
            payload_size: size.saturating_sub(HEADER_OFFSET),
        })
    }

    #[must_use]
    #[inline]
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Size of the plaintext.
    #[must_use]
    #[inline]
    pub fn payload_size(&self) -> u64 {
        self.payload_size
    }

    #[inline]
    pub fn decrypt(
        self,
        key: &DataKey,
        seek: u64,
        end: Option<u64>,
        chunk_size: usize,
    ) -> io::Result<DecryptingChunks<File>> {
        DecryptingChunks::new(self.file, key, seek, end, chunk_size)
    }
}

/// Size of the plaintext stored in an encrypted file.
#[inline]
pub fn payload_size(path: impl AsRef<Path>) -> Result<u64> {
    Ok(fs_err::metadata(path.as_ref())?
        .len()
        .saturating_sub(HEADER_OFFSET))
}

/// Size of the encrypted file that will be produced from a plaintext file.
#[inline]
pub fn output_size(path: impl AsRef<Path>) -> Result<u64> {
    Ok(fs_err::metadata(path.as_ref())?.len().cadd(HEADER_OFFSET)?)
}
