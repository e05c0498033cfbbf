pub mod catalog_reader;

use crate::error::Result;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Deserializes one JSON document from any `Read` source.
pub fn read_json<T: DeserializeOwned, R: Read>(source: R) -> Result<T> {
    Ok(serde_json::from_reader(BufReader::new(source))?)
}

pub fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    read_json(File::open(path)?)
}
