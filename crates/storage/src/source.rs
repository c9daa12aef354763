use std::fmt;
use std::str::FromStr;

use crate::error::StorageError;

/// A parsed `<bucket>/<prefix>` source reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub bucket: String,
    pub prefix: String,
}

impl SourceRef {
    /// Listing prefix, always ending in `/` so `frames/ab` does not match
    /// `frames/abc/...`.
    pub fn list_prefix(&self) -> String {
        if self.prefix.is_empty() || self.prefix.ends_with('/') {
            self.prefix.clone()
        } else {
            format!("{}/", self.prefix)
        }
    }
}

impl FromStr for SourceRef {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('/');
        match trimmed.split_once('/') {
            Some((bucket, prefix)) if !bucket.is_empty() => Ok(Self {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            }),
            _ => Err(StorageError::InvalidSource(s.to_string())),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_bucket_and_prefix() {
        let src: SourceRef = "frames/job-1".parse().unwrap();
        assert_eq!(src.bucket, "frames");
        assert_eq!(src.prefix, "job-1");
        assert_eq!(src.list_prefix(), "job-1/");
        assert_eq!(src.to_string(), "frames/job-1");
    }

    #[test]
    fn nested_prefix_is_kept() {
        let src: SourceRef = "videos/a.mp4/frames/".parse().unwrap();
        assert_eq!(src.bucket, "videos");
        assert_eq!(src.list_prefix(), "a.mp4/frames/");
    }

    #[test]
    fn missing_separator_is_rejected() {
        assert_matches!("frames".parse::<SourceRef>(), Err(StorageError::InvalidSource(_)));
        assert_matches!("/x".parse::<SourceRef>(), Err(StorageError::InvalidSource(_)));
    }
}
