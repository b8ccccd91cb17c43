//! Parent-to-init transfer of the container command.
//!
//! The parent writes one JSON array of strings into the pipe and closes
//! it; init reads descriptor 3 until EOF. Arguments containing spaces or
//! quotes arrive intact.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{FromRawFd, OwnedFd};

use corral_common::constants::HANDOFF_FD;
use corral_common::error::{CorralError, Result};

/// Writes `argv` to the pipe and closes it.
///
/// # Errors
///
/// Returns an error if the message cannot be encoded or written.
pub fn send(mut writer: impl Write, argv: &[String]) -> Result<()> {
    let message = serde_json::to_vec(argv)?;
    writer
        .write_all(&message)
        .and_then(|()| writer.flush())
        .map_err(|e| CorralError::io("handoff pipe", e))?;
    tracing::debug!(argc = argv.len(), "command handed to init");
    Ok(())
}

/// Reads the whole message from `reader` and decodes it.
///
/// # Errors
///
/// Returns an error if reading fails, the message is not a JSON array of
/// strings, or the array is empty.
pub fn receive(mut reader: impl Read) -> Result<Vec<String>> {
    let mut message = Vec::new();
    let _ = reader
        .read_to_end(&mut message)
        .map_err(|e| CorralError::io("handoff pipe", e))?;
    if message.is_empty() {
        return Err(CorralError::config("no command received from parent"));
    }
    let argv: Vec<String> = serde_json::from_slice(&message)?;
    if argv.is_empty() {
        return Err(CorralError::config("empty command received from parent"));
    }
    Ok(argv)
}

/// Reads the command from the inherited descriptor 3.
///
/// # Errors
///
/// See [`receive`].
pub fn receive_inherited() -> Result<Vec<String>> {
    // SAFETY: the launcher places the read end of the handoff pipe at
    // HANDOFF_FD before exec, and nothing else in init owns that
    // descriptor, so taking ownership here is sound.
    let pipe = File::from(unsafe { OwnedFd::from_raw_fd(HANDOFF_FD) });
    receive(pipe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn arguments_with_spaces_survive() {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo 'hello world' \"and more\"".to_string(),
        ];
        let mut buf = Vec::new();
        send(&mut buf, &argv).unwrap();
        assert_eq!(receive(Cursor::new(buf)).unwrap(), argv);
    }

    #[test]
    fn message_is_a_json_array() {
        let mut buf = Vec::new();
        send(&mut buf, &["top".to_string()]).unwrap();
        assert_eq!(buf, br#"["top"]"#);
    }

    #[test]
    fn empty_input_is_fatal() {
        assert!(matches!(receive(Cursor::new(Vec::new())), Err(CorralError::Config { .. })));
        assert!(matches!(receive(Cursor::new(b"[]".to_vec())), Err(CorralError::Config { .. })));
    }

    #[test]
    fn legacy_space_separated_message_is_rejected() {
        assert!(receive(Cursor::new(b"sh -c top".to_vec())).is_err());
    }

    #[test]
    fn works_across_a_real_pipe() {
        let (read, write) = nix::unistd::pipe().unwrap();
        let argv = vec!["/bin/echo".to_string(), "a b".to_string()];
        send(File::from(write), &argv).unwrap();
        assert_eq!(receive(File::from(read)).unwrap(), argv);
    }
}
