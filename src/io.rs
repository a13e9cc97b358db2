//! Safetensors I/O for the `fragility` binary.
//!
//! Reader: `data` `[C, T]` (F32 or F64), `sfreq` (scalar F32/F64) and an
//! optional `ch_names` byte tensor holding newline-separated names.
//! Writer: run outputs as F64/I32 tensors.
use anyhow::{bail, Context, Result};
use ndarray::{Array2, Array3};
use std::collections::HashMap;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::engine::FragilityRun;
use crate::matrix::FragilityMatrix;
use crate::signal::Signal;

// ── Low-level safetensors parser ──────────────────────────────────────────────

type Header = HashMap<String, serde_json::Value>;

fn parse_header(bytes: &[u8]) -> Result<(Header, usize)> {
    if bytes.len() < 8 {
        bail!("safetensors file too small");
    }
    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[..8]);
    let n = u64::from_le_bytes(len);
    let end = usize::try_from(n)
        .ok()
        .and_then(|n| n.checked_add(8))
        .filter(|&end| end <= bytes.len())
        .with_context(|| {
            format!("safetensors header truncated ({} of {n} bytes)", bytes.len() - 8)
        })?;
    let mut header: Header =
        serde_json::from_slice(&bytes[8..end]).context("failed to parse safetensors header")?;
    header.remove("__metadata__");
    Ok((header, end))
}

fn tensor_bytes<'a>(
    bytes: &'a [u8],
    data_start: usize,
    entry: &serde_json::Value,
) -> Result<&'a [u8]> {
    let offsets = entry["data_offsets"].as_array().context("missing data_offsets")?;
    let (s, e) = match offsets.as_slice() {
        [s, e] => (
            s.as_u64().context("bad data offset")? as usize,
            e.as_u64().context("bad data offset")? as usize,
        ),
        _ => bail!("data_offsets must have two entries"),
    };
    let start = data_start.checked_add(s).context("tensor offset overflows")?;
    let end = data_start.checked_add(e).context("tensor offset overflows")?;
    bytes.get(start..end).context("tensor data out of bounds")
}

fn read_f64_tensor(
    bytes: &[u8],
    data_start: usize,
    entry: &serde_json::Value,
) -> Result<Vec<f64>> {
    let raw = tensor_bytes(bytes, data_start, entry)?;
    match entry["dtype"].as_str() {
        Some("F32") => Ok(raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
            .collect()),
        Some("F64") => Ok(raw
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect()),
        other => bail!("unsupported dtype {other:?}, expected F32 or F64"),
    }
}

fn shape_of(entry: &serde_json::Value) -> Result<Vec<usize>> {
    entry["shape"]
        .as_array()
        .context("missing shape")?
        .iter()
        .map(|v| v.as_u64().map(|d| d as usize).context("bad shape entry"))
        .collect()
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Recording loaded from a safetensors file.
pub struct SignalFile {
    /// [C, T] in original units.
    pub data: Array2<f64>,
    pub sfreq: f64,
    /// Empty if the file carries no names.
    pub ch_names: Vec<String>,
}

impl SignalFile {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let (header, data_start) = parse_header(&bytes)?;

        let data_entry = header.get("data").context("missing 'data' key")?;
        let shape = shape_of(data_entry)?;
        let [n_ch, n_t] = shape[..] else {
            bail!("'data' must be 2-D [C, T], got shape {shape:?}");
        };
        let values = read_f64_tensor(&bytes, data_start, data_entry)?;
        let data = Array2::from_shape_vec((n_ch, n_t), values)
            .context("'data' size does not match shape")?;

        let sfreq_entry = header.get("sfreq").context("missing 'sfreq' key")?;
        let sfreq = *read_f64_tensor(&bytes, data_start, sfreq_entry)?
            .first()
            .context("'sfreq' is empty")?;

        let ch_names = match header.get("ch_names") {
            Some(e) => std::str::from_utf8(tensor_bytes(&bytes, data_start, e)?)
                .context("'ch_names' is not UTF-8")?
                .split('\n')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => vec![],
        };

        Ok(SignalFile { data, sfreq, ch_names })
    }

    /// Validate into a [`Signal`]; missing names become `ch0, ch1, …`.
    pub fn into_signal(self) -> Result<Signal> {
        let signal = if self.ch_names.is_empty() {
            Signal::from_array(self.data, self.sfreq)?
        } else {
            Signal::new(self.data, self.sfreq, self.ch_names)?
        };
        Ok(signal)
    }

    /// Write in the layout [`load`](Self::load) reads.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut w = StWriter::new();
        w.add_f64_arr2("data", &self.data);
        w.add_f64("sfreq", &[self.sfreq], &[1]);
        if !self.ch_names.is_empty() {
            w.add_u8("ch_names", self.ch_names.join("\n").as_bytes());
        }
        w.write(path)
    }
}

// ── Generic safetensors builder ───────────────────────────────────────────────

/// One tensor queued in a [`StWriter`].
struct Entry {
    name: String,
    dtype: &'static str,
    shape: Vec<usize>,
    bytes: Vec<u8>,
}

/// Safetensors writer for F64, I32 and U8 tensors.
///
/// Tensors are laid out back to back in insertion order; the JSON header is
/// space-padded to a multiple of 8 bytes.
///
/// ```rust,no_run
/// use fragility::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_f64("scores", &[1.0f64, 2.0, 3.0], &[1, 3]);
/// w.add_i32("status", &[0, 0, 3], &[1, 3]);
/// w.write(Path::new("/tmp/out.safetensors")).unwrap();
/// ```
#[derive(Default)]
pub struct StWriter {
    entries: Vec<Entry>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: &str, dtype: &'static str, shape: Vec<usize>, bytes: Vec<u8>) {
        self.entries.push(Entry { name: name.to_string(), dtype, shape, bytes });
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let bytes = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.push(name, "F64", shape.to_vec(), bytes);
    }

    pub fn add_f64_arr2(&mut self, name: &str, arr: &Array2<f64>) {
        let data: Vec<f64> = arr.iter().copied().collect();
        self.add_f64(name, &data, &[arr.nrows(), arr.ncols()]);
    }

    pub fn add_f64_arr3(&mut self, name: &str, arr: &Array3<f64>) {
        let data: Vec<f64> = arr.iter().copied().collect();
        let (a, b, c) = arr.dim();
        self.add_f64(name, &data, &[a, b, c]);
    }

    pub fn add_i32(&mut self, name: &str, data: &[i32], shape: &[usize]) {
        let bytes = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.push(name, "I32", shape.to_vec(), bytes);
    }

    pub fn add_u8(&mut self, name: &str, data: &[u8]) {
        self.push(name, "U8", vec![data.len()], data.to_vec());
    }

    /// JSON header, space-padded to a multiple of 8 bytes.
    fn header(&self) -> Result<Vec<u8>> {
        let mut offset = 0usize;
        let map: serde_json::Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|e| {
                let range = [offset, offset + e.bytes.len()];
                offset = range[1];
                let meta = serde_json::json!({
                    "dtype": e.dtype,
                    "shape": e.shape,
                    "data_offsets": range,
                });
                (e.name.clone(), meta)
            })
            .collect();
        let mut header = serde_json::to_vec(&map).context("encoding safetensors header")?;
        header.resize(header.len().next_multiple_of(8), b' ');
        Ok(header)
    }

    /// Serialise into `out`: header length, header, tensor data.
    pub fn write_to(&self, out: &mut impl Write) -> Result<()> {
        let header = self.header()?;
        out.write_all(&(header.len() as u64).to_le_bytes())?;
        out.write_all(&header)?;
        for e in &self.entries {
            out.write_all(&e.bytes)?;
        }
        Ok(())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        let mut out = BufWriter::new(file);
        self.write_to(&mut out)?;
        out.flush().with_context(|| format!("writing {}", path.display()))
    }
}

// ── Run writer ────────────────────────────────────────────────────────────────

/// Write a run to `path`.
///
/// `fragility` / `fragility_norm` / `status`: [C, N]
/// `window_starts` / `valid_windows`: [N]
/// `state_array`: [N, n, n]   `delta_vectors`: [N, C, n]
/// `ch_names`: newline-separated bytes.
pub fn write_run(run: &FragilityRun, normalized: &FragilityMatrix, path: &Path) -> Result<()> {
    let m = &run.matrix;
    let (n_ch, n_w) = m.dim();

    let mut w = StWriter::new();
    w.add_f64_arr2("fragility", m.scores());
    w.add_f64_arr2("fragility_norm", normalized.scores());
    let status: Vec<i32> = m.status().iter().map(|&s| s as i32).collect();
    w.add_i32("status", &status, &[n_ch, n_w]);
    let starts: Vec<i32> = m.window_starts().iter().map(|&s| s as i32).collect();
    w.add_i32("window_starts", &starts, &[n_w]);
    let valid: Vec<i32> = run.valid_windows().iter().map(|&v| v as i32).collect();
    w.add_i32("valid_windows", &valid, &[n_w]);
    w.add_f64_arr3("state_array", &run.state_array());
    w.add_f64_arr3("delta_vectors", &run.delta_vectors());
    w.add_f64("sfreq", &[m.sfreq()], &[1]);
    w.add_u8("ch_names", m.ch_names().join("\n").as_bytes());
    w.write(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("fragility-io-{}-{name}", std::process::id()))
    }

    #[test]
    fn signal_file_reads_back_what_it_wrote() {
        let path = tmp("signal.safetensors");
        let data = Array2::from_shape_fn((2, 5), |(c, t)| c as f64 * 10.0 + t as f64);
        let names = vec!["A1".into(), "A2".into()];
        let file = SignalFile { data: data.clone(), sfreq: 500.0, ch_names: names };
        file.write(&path).unwrap();

        let back = SignalFile::load(&path).unwrap();
        assert_eq!(back.data, data);
        assert_eq!(back.sfreq, 500.0);
        assert_eq!(back.ch_names, vec!["A1", "A2"]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn reads_f32_data() {
        let path = tmp("f32.safetensors");
        let values = [1.0f32, 2.0, 3.0, 4.0];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut w = StWriter::new();
        w.push("data", "F32", vec![2, 2], bytes);
        w.push("sfreq", "F32", vec![1], 256.0f32.to_le_bytes().to_vec());
        w.write(&path).unwrap();

        let sig = SignalFile::load(&path).unwrap().into_signal().unwrap();
        assert_eq!(sig.data()[[1, 0]], 3.0);
        assert_eq!(sig.ch_names(), &["ch0".to_string(), "ch1".to_string()]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_data_key_is_error() {
        let path = tmp("empty.safetensors");
        let mut w = StWriter::new();
        w.add_f64("sfreq", &[1.0], &[1]);
        w.write(&path).unwrap();
        assert!(SignalFile::load(&path).is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn writer_layout_is_aligned_and_contiguous() {
        let mut w = StWriter::new();
        w.add_f64("a", &[1.0, 2.0], &[2]);
        w.add_i32("b", &[7], &[1]);
        w.add_u8("c", b"xyz");
        let mut bytes = Vec::new();
        w.write_to(&mut bytes).unwrap();

        let n = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
        assert_eq!(n % 8, 0);
        assert_eq!(bytes.len(), 8 + n + 16 + 4 + 3);

        let (header, start) = parse_header(&bytes).unwrap();
        assert_eq!(start, 8 + n);
        assert_eq!(header["a"]["data_offsets"], serde_json::json!([0, 16]));
        assert_eq!(header["b"]["data_offsets"], serde_json::json!([16, 20]));
        assert_eq!(header["c"]["data_offsets"], serde_json::json!([20, 23]));
        assert_eq!(tensor_bytes(&bytes, start, &header["c"]).unwrap(), b"xyz");
        assert_eq!(read_f64_tensor(&bytes, start, &header["a"]).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn oversized_header_length_is_an_error() {
        let mut bytes = u64::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        let err = parse_header(&bytes).unwrap_err();
        assert!(err.to_string().contains("truncated"), "{err}");

        let mut bytes = 1_000u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        assert!(parse_header(&bytes).is_err());
    }

    #[test]
    fn out_of_range_offsets_are_an_error() {
        let header = serde_json::json!({
            "data": { "dtype": "F64", "shape": [1], "data_offsets": [0, u64::MAX] }
        });
        let mut bytes = Vec::new();
        let text = serde_json::to_vec(&header).unwrap();
        bytes.extend_from_slice(&(text.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&text);
        let (h, start) = parse_header(&bytes).unwrap();
        assert!(tensor_bytes(&bytes, start, &h["data"]).is_err());
    }
}
