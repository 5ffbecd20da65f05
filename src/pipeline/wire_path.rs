//! Serde adapters that carry paths through JSON frames without loss.
//!
//! A UTF-8 path is written as a plain string. Any other path is written as its raw platform
//! units (bytes on Unix, UTF-16 units on Windows), so file names that are not valid UTF-8 still
//! reach the worker and come back in results unchanged.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
#[serde(untagged)]
enum WireRef<'a> {
    Text(Cow<'a, str>),
    #[cfg(unix)]
    Bytes(&'a [u8]),
    #[cfg(windows)]
    Wide(Vec<u16>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Wire {
    Text(String),
    #[cfg(unix)]
    Bytes(Vec<u8>),
    #[cfg(windows)]
    Wide(Vec<u16>),
}

fn to_wire(path: &Path) -> WireRef<'_> {
    if let Some(text) = path.to_str() {
        return WireRef::Text(Cow::Borrowed(text));
    }
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        WireRef::Bytes(path.as_os_str().as_bytes())
    }
    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        WireRef::Wide(path.as_os_str().encode_wide().collect())
    }
    #[cfg(not(any(unix, windows)))]
    {
        WireRef::Text(path.to_string_lossy())
    }
}

impl From<Wire> for PathBuf {
    fn from(wire: Wire) -> Self {
        match wire {
            Wire::Text(text) => PathBuf::from(text),
            #[cfg(unix)]
            Wire::Bytes(bytes) => {
                use std::os::unix::ffi::OsStringExt;
                PathBuf::from(std::ffi::OsString::from_vec(bytes))
            }
            #[cfg(windows)]
            Wire::Wide(units) => {
                use std::os::windows::ffi::OsStringExt;
                PathBuf::from(std::ffi::OsString::from_wide(&units))
            }
        }
    }
}

pub fn serialize<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
    to_wire(path).serialize(serializer)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
    Wire::deserialize(deserializer).map(PathBuf::from)
}

/// For `Vec<PathBuf>` fields.
pub mod list {
    use super::*;

    pub fn serialize<S: Serializer>(paths: &[PathBuf], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(paths.iter().map(|p| to_wire(p)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<PathBuf>, D::Error> {
        let wires = Vec::<Wire>::deserialize(deserializer)?;
        Ok(wires.into_iter().map(PathBuf::from).collect())
    }
}

/// For `Vec<(PathBuf, String)>` fields (path plus error detail).
pub mod with_detail {
    use super::*;

    pub fn serialize<S: Serializer>(
        entries: &[(PathBuf, String)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(entries.iter().map(|(p, detail)| (to_wire(p), detail)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(PathBuf, String)>, D::Error> {
        let wires = Vec::<(Wire, String)>::deserialize(deserializer)?;
        Ok(wires
            .into_iter()
            .map(|(p, detail)| (PathBuf::from(p), detail))
            .collect())
    }
}
