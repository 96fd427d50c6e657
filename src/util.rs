use std::io::{stderr, Read, Result, Stderr, Write};

pub(crate) type ProgressBar = pbr::ProgressBar<Stderr>;

pub(crate) fn create_progress_bar(total: u64) -> ProgressBar {
    ProgressBar::on(stderr(), total)
}

// Little-endian primitives used by the model files.

pub(crate) fn write_i32<W: Write>(out: &mut W, v: i32) -> Result<()> {
    out.write_all(&v.to_le_bytes())
}

pub(crate) fn read_i32<R: Read>(input: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub(crate) fn write_u64<W: Write>(out: &mut W, v: u64) -> Result<()> {
    out.write_all(&v.to_le_bytes())
}

pub(crate) fn read_u64<R: Read>(input: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn write_f64<W: Write>(out: &mut W, v: f64) -> Result<()> {
    out.write_all(&v.to_le_bytes())
}

pub(crate) fn read_f64<R: Read>(input: &mut R) -> Result<f64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

pub(crate) fn write_bool<W: Write>(out: &mut W, v: bool) -> Result<()> {
    out.write_all(&[v as u8])
}

pub(crate) fn read_bool<R: Read>(input: &mut R) -> Result<bool> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf)?;
    Ok(buf[0] != 0)
}

pub(crate) fn skip_bytes<R: Read>(input: &mut R, n: u64) -> Result<()> {
    std::io::copy(&mut input.by_ref().take(n), &mut std::io::sink())?;
    Ok(())
}
