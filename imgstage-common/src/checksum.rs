use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

/// Hash a file without loading it into memory; image artifacts can be large.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
