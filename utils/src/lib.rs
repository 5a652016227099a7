use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

pub fn read_to_string(filepath:&Path) -> std::io::Result<String> {
    let mut f = File::open(filepath)?;
    let mut s = String::new();
    f.read_to_string(&mut s)?;
    Ok(s)
}

// writes are staged through a temp file in the destination directory so a
// failure part-way never leaves a truncated file behind
pub fn write_to_file_atomic(filepath:&Path,string:&str) -> std::io::Result<()> {
    let dir = filepath.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut f = NamedTempFile::new_in(dir)?;
    f.write_all(string.as_bytes())?;
    f.persist(filepath).map_err(|e| e.error)?;
    Ok(())
}

pub fn vec_to_string<T>(vec:&[T]) -> String
    where T:std::string::ToString {
    let vstr:Vec<String> = vec.iter().map(|num| num.to_string()).collect();
    vstr.join(" ")
}
