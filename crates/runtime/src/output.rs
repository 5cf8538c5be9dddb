//! Bounded capture of a child's stdout/stderr for diagnostics.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

/// Keeps at most `limit` bytes, discarding the oldest once full.
#[derive(Debug)]
pub struct BoundedBuffer {
	data: Vec<u8>,
	limit: usize,
	truncated: bool,
}

impl BoundedBuffer {
	pub fn new(limit: usize) -> Self {
		Self {
			data: Vec::new(),
			limit,
			truncated: false,
		}
	}

	pub fn push(&mut self, bytes: &[u8]) {
		if self.limit == 0 {
			self.truncated |= !bytes.is_empty();
			return;
		}
		if bytes.len() >= self.limit {
			self.data.clear();
			self.data.extend_from_slice(&bytes[bytes.len() - self.limit..]);
			self.truncated = true;
			return;
		}
		let overflow = (self.data.len() + bytes.len()).saturating_sub(self.limit);
		if overflow > 0 {
			self.data.drain(..overflow);
			self.truncated = true;
		}
		self.data.extend_from_slice(bytes);
	}

	pub fn len(&self) -> usize {
		self.data.len()
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	pub fn is_truncated(&self) -> bool {
		self.truncated
	}

	/// Lossy UTF-8 rendering, trimmed, prefixed with `...` when older output was dropped.
	pub fn text(&self) -> String {
		let text = String::from_utf8_lossy(&self.data);
		let text = text.trim();
		if self.truncated && !text.is_empty() {
			format!("...{text}")
		} else {
			text.to_string()
		}
	}
}

/// Shared buffers filled by background reader tasks.
#[derive(Debug)]
pub struct OutputCapture {
	stdout: Arc<Mutex<BoundedBuffer>>,
	stderr: Arc<Mutex<BoundedBuffer>>,
	readers: Vec<JoinHandle<()>>,
}

impl OutputCapture {
	pub fn new(limit: usize) -> Self {
		Self {
			stdout: Arc::new(Mutex::new(BoundedBuffer::new(limit))),
			stderr: Arc::new(Mutex::new(BoundedBuffer::new(limit))),
			readers: Vec::new(),
		}
	}

	pub fn capture_stdout<R>(&mut self, reader: R)
	where
		R: AsyncRead + Unpin + Send + 'static,
	{
		self.readers.push(pump(reader, Arc::clone(&self.stdout)));
	}

	pub fn capture_stderr<R>(&mut self, reader: R)
	where
		R: AsyncRead + Unpin + Send + 'static,
	{
		self.readers.push(pump(reader, Arc::clone(&self.stderr)));
	}

	pub fn stdout(&self) -> String {
		self.stdout.lock().text()
	}

	pub fn stderr(&self) -> String {
		self.stderr.lock().text()
	}

	pub fn has_output(&self) -> bool {
		!self.stdout.lock().is_empty() || !self.stderr.lock().is_empty()
	}

	/// Waits (bounded) for the readers to hit EOF so output written just before
	/// the process exited is not lost.
	pub async fn drain(&mut self, limit: Duration) {
		for reader in self.readers.drain(..) {
			let abort = reader.abort_handle();
			if tokio::time::timeout(limit, reader).await.is_err() {
				abort.abort();
			}
		}
	}

	/// Combined diagnostic text: `stderr: ...; stdout: ...`, omitting empty streams.
	pub fn diagnostics(&self) -> String {
		let stderr = self.stderr();
		let stdout = self.stdout();
		match (stderr.is_empty(), stdout.is_empty()) {
			(true, true) => String::new(),
			(false, true) => format!("stderr: {stderr}"),
			(true, false) => format!("stdout: {stdout}"),
			(false, false) => format!("stderr: {stderr}; stdout: {stdout}"),
		}
	}
}

impl Drop for OutputCapture {
	fn drop(&mut self) {
		for reader in &self.readers {
			reader.abort();
		}
	}
}

fn pump<R>(mut reader: R, sink: Arc<Mutex<BoundedBuffer>>) -> JoinHandle<()>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	tokio::spawn(async move {
		let mut chunk = [0u8; 4096];
		loop {
			match reader.read(&mut chunk).await {
				Ok(0) | Err(_) => break,
				Ok(n) => sink.lock().push(&chunk[..n]),
			}
		}
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keeps_newest_bytes_when_full() {
		let mut buffer = BoundedBuffer::new(8);
		buffer.push(b"hello ");
		buffer.push(b"world");
		assert_eq!(buffer.len(), 8);
		assert!(buffer.is_truncated());
		assert_eq!(buffer.text(), "...lo world");
	}

	#[test]
	fn oversized_chunk_keeps_its_tail() {
		let mut buffer = BoundedBuffer::new(4);
		buffer.push(b"abcdefgh");
		assert_eq!(buffer.text(), "...efgh");
	}

	#[test]
	fn small_output_is_untouched() {
		let mut buffer = BoundedBuffer::new(64);
		buffer.push(b"  nbdkit: error\n");
		assert!(!buffer.is_truncated());
		assert_eq!(buffer.text(), "nbdkit: error");
	}

	#[tokio::test]
	async fn diagnostics_label_each_stream() {
		let mut capture = OutputCapture::new(1024);
		capture.capture_stderr(&b"vddk: cannot connect"[..]);
		capture.capture_stdout(&b""[..]);
		capture.drain(Duration::from_secs(1)).await;
		assert_eq!(capture.diagnostics(), "stderr: vddk: cannot connect");
		assert!(capture.has_output());
	}
}
