use {
    anyhow::{Error, Result, ensure, format_err},
    regex::Regex,
    std::{fmt, str::FromStr, sync::LazyLock},
};

/// Value of the `Content-Range` header of an upload chunk: `bytes <start>-<end>/<total>`.
///
/// `end` is inclusive. The total size must be known in advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ContentRange {
    /// Range of a chunk of `len` bytes at `start` in a file of `total` bytes.
    #[inline]
    pub fn for_chunk(start: u64, len: u64, total: u64) -> Result<Self> {
        ensure!(len > 0, "empty chunk");
        let end = start
            .checked_add(len - 1)
            .ok_or_else(|| format_err!("chunk range overflow"))?;
        Self::new(start, end, total)
    }

    #[inline]
    pub fn new(start: u64, end: u64, total: u64) -> Result<Self> {
        ensure!(start <= end, "range start {start} is after end {end}");
        ensure!(end < total, "range end {end} is beyond total size {total}");
        Ok(Self { start, end, total })
    }

    /// Number of bytes covered by the range.
    #[must_use]
    #[inline]
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Whether this range covers the last byte of the file.
    #[must_use]
    #[inline]
    pub fn is_last(&self) -> bool {
        self.end + 1 == self.total
    }
}

impl FromStr for ContentRange {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^bytes ([0-9]+)-([0-9]+)/([0-9]+)$").expect("valid regex")
        });
        let captures = RE
            .captures(s)
            .ok_or_else(|| format_err!("invalid content range: {s:?}"))?;
        let number = |index: usize| -> Result<u64> {
            Ok(captures
                .get(index)
                .ok_or_else(|| format_err!("invalid content range: {s:?}"))?
                .as_str()
                .parse()?)
        };
        Self::new(number(1)?, number(2)?, number(3)?)
    }
}

impl fmt::Display for ContentRange {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes {}-{}/{}", self.start, self.end, self.total)
    }
}
