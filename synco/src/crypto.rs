//! Passphrase based artifact encryption (age, scrypt recipient).

use crate::utils::errors::{Result, SyncoError};
use age::secrecy::{ExposeSecret, SecretString};
use age::stream::{StreamReader, StreamWriter};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::iter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Encrypts and decrypts artifacts with the session password.
#[derive(Clone)]
pub struct ArtifactCipher {
    passphrase: Arc<SecretString>,
    work_factor: Option<u8>,
}

impl std::fmt::Debug for ArtifactCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCipher")
            .field("work_factor", &self.work_factor)
            .finish_non_exhaustive()
    }
}

impl ArtifactCipher {
    pub fn new(passphrase: &str) -> Self {
        Self {
            passphrase: Arc::new(SecretString::from(passphrase.to_owned())),
            work_factor: None,
        }
    }

    /// Override the scrypt work factor (log2) used when encrypting.
    pub fn with_work_factor(mut self, log_n: Option<u8>) -> Self {
        self.work_factor = log_n;
        self
    }

    fn secret(&self) -> SecretString {
        SecretString::from(self.passphrase.expose_secret().to_owned())
    }

    pub fn encrypt_writer<W: Write>(&self, output: W) -> Result<StreamWriter<W>> {
        let mut recipient = age::scrypt::Recipient::new(self.secret());
        if let Some(log_n) = self.work_factor {
            recipient.set_work_factor(log_n);
        }
        let encryptor =
            age::Encryptor::with_recipients(iter::once(&recipient as &dyn age::Recipient))
                .map_err(|e| SyncoError::Encryption(e.to_string()))?;
        Ok(encryptor.wrap_output(output)?)
    }

    /// Start decrypting `input`. `artifact` names the source in errors.
    pub fn decrypt_reader<R: Read>(&self, input: R, artifact: &str) -> Result<StreamReader<R>> {
        let decryptor = age::Decryptor::new(input).map_err(|e| decrypt_error(e, artifact))?;
        let identity = age::scrypt::Identity::new(self.secret());
        decryptor
            .decrypt(iter::once(&identity as &dyn age::Identity))
            .map_err(|e| decrypt_error(e, artifact))
    }

    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut writer = self.encrypt_writer(Vec::with_capacity(plaintext.len() + 256))?;
        writer.write_all(plaintext)?;
        Ok(writer.finish()?)
    }

    pub fn decrypt_bytes(&self, ciphertext: &[u8], artifact: &str) -> Result<Vec<u8>> {
        let mut reader = self.decrypt_reader(ciphertext, artifact)?;
        let mut plaintext = Vec::new();
        reader
            .read_to_end(&mut plaintext)
            .map_err(|e| stream_error(e, artifact))?;
        Ok(plaintext)
    }

    /// Create `path` and return a writer that encrypts into it.
    pub fn open_encrypting_sink(&self, path: &Path) -> Result<EncryptingSink> {
        let file = File::create(path)?;
        let writer = self.encrypt_writer(BufWriter::new(file))?;
        debug!(path = %path.display(), "Opened encrypted artifact");
        Ok(EncryptingSink {
            inner: Some(writer),
            path: path.to_path_buf(),
            bytes_written: 0,
        })
    }
}

fn decrypt_error(e: age::DecryptError, artifact: &str) -> SyncoError {
    match e {
        age::DecryptError::Io(e) => SyncoError::Io(e),
        other => SyncoError::Decryption {
            artifact: artifact.to_string(),
            message: other.to_string(),
        },
    }
}

/// Errors raised while streaming the payload. Authentication failures
/// surface as `InvalidData`.
pub fn stream_error(e: io::Error, artifact: &str) -> SyncoError {
    if e.kind() == io::ErrorKind::InvalidData {
        SyncoError::Decryption {
            artifact: artifact.to_string(),
            message: e.to_string(),
        }
    } else {
        SyncoError::Io(e)
    }
}

/// Encrypting file writer that counts plaintext bytes.
///
/// Only [`finish`](Self::finish) writes the final cipher chunk. A sink
/// dropped without it abandons the stream and removes the file, so a failed
/// export never leaves a valid-looking artifact behind.
pub struct EncryptingSink {
    inner: Option<StreamWriter<BufWriter<File>>>,
    path: PathBuf,
    bytes_written: u64,
}

impl EncryptingSink {
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the stream and return the number of plaintext bytes written.
    pub fn finish(mut self) -> Result<u64> {
        if let Err(e) = self.close() {
            let _ = std::fs::remove_file(&self.path);
            return Err(e.into());
        }
        Ok(self.bytes_written)
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(writer) = self.inner.take() {
            let buffered = writer.finish()?;
            let file = buffered.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        Ok(())
    }
}

impl Write for EncryptingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = self
            .inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "sink already closed"))?;
        let n = writer.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for EncryptingSink {
    fn drop(&mut self) {
        if let Some(writer) = self.inner.take() {
            drop(writer);
            match std::fs::remove_file(&self.path) {
                Ok(()) => debug!(path = %self.path.display(), "Removed unfinished artifact"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove unfinished artifact")
                }
            }
        }
    }
}

/// Cheap key derivation so tests stay fast.
#[cfg(test)]
pub(crate) fn test_cipher(passphrase: &str) -> ArtifactCipher {
    ArtifactCipher::new(passphrase).with_work_factor(Some(4))
}
