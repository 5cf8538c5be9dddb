//! Process signalling helpers shared by export supervision.

/// Asks process `pid` to shut down gracefully (`SIGTERM` on unix).
///
/// Returns an error if the signal could not be delivered, e.g. because the
/// process has already been reaped.
pub fn request_termination(pid: u32) -> std::io::Result<()> {
	#[cfg(unix)]
	{
		let pid = libc::pid_t::try_from(pid).map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("pid {pid} out of range")))?;
		if pid <= 0 {
			return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "refusing to signal process group"));
		}
		// SAFETY: kill(2) has no memory-safety preconditions; pid is a positive child pid.
		let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
		if rc == 0 { Ok(()) } else { Err(std::io::Error::last_os_error()) }
	}

	#[cfg(not(unix))]
	{
		let _ = pid;
		Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "graceful termination is not available on this platform"))
	}
}
