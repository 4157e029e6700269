use crate::backup::archive::tmp_path_for;
use crate::backup::backup_config::BackupConfig;
use crate::backup::context::RunContext;
use crate::backup::finish::Finish;
use crate::backup::function_path;
use crate::backup::pipeline::{OnFailure, Stage};
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use ::age::stream::StreamWriter;
use function_name::named;
use std::fs::File;
use std::io::{BufReader, BufWriter, IntoInnerError, Write};
use std::path::Path;

/// Wraps `writer` in an age stream keyed by `passphrase` (scrypt recipient).
pub fn build_encryptor<W: Write>(passphrase: &RedactedString, writer: W) -> Result<StreamWriter<W>> {
    tracing::debug!("Initializing Age encryption with passphrase");
    Ok(age::Encryptor::with_user_passphrase(passphrase.inner().as_str().into()).wrap_output(writer)?)
}

/// Encrypts `plain` into `out_path`, returning the number of plaintext bytes.
///
/// Nothing appears under `out_path` unless the whole stream was written and
/// synced.
#[named]
pub fn encrypt_file(plain: &Path, out_path: &Path, passphrase: &RedactedString) -> Result<u64> {
    let mut reader = File::open(plain)
        .map(BufReader::new)
        .map_err(Error::from)
        .add_msg(format!("Cannot open archive {:?}", plain))
        .add_fn_name(function_path!())?;
    let tmp_path = tmp_path_for(out_path);
    let file = File::create_new(&tmp_path)
        .map_err(Error::from)
        .add_msg(format!("Cannot create {:?}", tmp_path))
        .add_fn_name(function_path!())?;

    let res = (|| -> Result<u64> {
        let mut writer = build_encryptor(passphrase, BufWriter::new(file))?;
        let copied = std::io::copy(&mut reader, &mut writer)?;
        Finish::finish(writer)?
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .sync_all()?;
        std::fs::rename(&tmp_path, out_path)?;
        Ok(copied)
    })();

    res.map_err(|mut e| {
        if let Err(e2) = std::fs::remove_file(&tmp_path) {
            e = e.chain(Error::from(e2).add_msg("Delete tmp file failed."));
        }
        e
    })
    .add_fn_name(function_path!())
}

pub struct EncryptStage<'a> {
    config: &'a BackupConfig,
}

impl<'a> EncryptStage<'a> {
    pub fn new(config: &'a BackupConfig) -> Self {
        Self { config }
    }
}

impl Stage for EncryptStage<'_> {
    fn name(&self) -> &'static str {
        "encryption"
    }

    fn on_failure(&self) -> OnFailure {
        OnFailure::Abort
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<()> {
        let log = ctx.log();
        let plain = ctx.archive_path();
        let encrypted = ctx.encrypted_path();

        log.say(&format!("Encrypting {:?}", plain));
        let res = encrypt_file(plain, encrypted, self.config.passphrase());
        // the plaintext is removed whether or not encryption succeeded
        let removed = match std::fs::remove_file(plain) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::from(e)
                .add_msg(format!("Cannot remove plaintext archive {:?}", plain))),
            _ => Ok(()),
        };
        let bytes = match (res, removed) {
            (Ok(bytes), removed) => {
                removed?;
                bytes
            }
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(e2)) => return Err(e.chain(e2)),
        };

        log.say(&format!(
            "Encryption complete: {:?} ({} bytes of plaintext)",
            encrypted, bytes
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::context::RunId;
    use crate::backup::testutil::{test_config, MemoryRunLog};
    use chrono::Utc;
    use std::io::Read;
    use tempfile::TempDir;

    fn decrypt(path: &Path, passphrase: &str) -> std::result::Result<Vec<u8>, age::DecryptError> {
        let decryptor = age::Decryptor::new(File::open(path).unwrap())?;
        let identity = age::scrypt::Identity::new(passphrase.to_string().into());
        let mut reader = decryptor.decrypt(std::iter::once(&identity as &dyn age::Identity))?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        Ok(out)
    }

    #[test]
    fn test_encrypt_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("plain");
        let out = dir.path().join("plain.enc");
        std::fs::write(&plain, b"backup bytes").unwrap();
        let passphrase = RedactedString::from("test_passphrase_123");

        let copied = encrypt_file(&plain, &out, &passphrase).unwrap();

        assert_eq!(copied, 12);
        assert!(!tmp_path_for(&out).exists());
        assert_ne!(std::fs::read(&out).unwrap(), b"backup bytes");
        assert_eq!(decrypt(&out, "test_passphrase_123").unwrap(), b"backup bytes");
        assert!(decrypt(&out, "wrong passphrase").is_err());
    }

    #[test]
    fn test_missing_input_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.enc");

        let res = encrypt_file(&dir.path().join("nope"), &out, &RedactedString::from("12345678"));

        assert!(res.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_stage_removes_plaintext_once() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let log = MemoryRunLog::default();
        let mut ctx = RunContext::new(&config, RunId::new("web-01", Utc::now()), &log);
        std::fs::write(ctx.archive_path(), b"not really a tarball").unwrap();

        let stage = EncryptStage::new(&config);
        stage.run(&mut ctx).unwrap();

        assert!(!ctx.archive_path().exists());
        assert_eq!(
            decrypt(ctx.encrypted_path(), "correct horse battery staple").unwrap(),
            b"not really a tarball"
        );
        assert!(log.contains("Encryption complete"));

        // a second pass has no plaintext left to encrypt
        assert!(stage.run(&mut ctx).is_err());
        assert!(ctx.encrypted_path().exists());
    }

    #[test]
    fn test_failed_encryption_removes_plaintext() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let log = MemoryRunLog::default();
        let mut ctx = RunContext::new(&config, RunId::new("web-01", Utc::now()), &log);
        std::fs::write(ctx.archive_path(), b"plaintext secrets").unwrap();
        // an existing tmp file makes the encrypted output impossible to create
        std::fs::write(tmp_path_for(ctx.encrypted_path()), b"stale").unwrap();

        let res = EncryptStage::new(&config).run(&mut ctx);

        assert!(res.is_err());
        assert!(!ctx.archive_path().exists());
        assert!(!ctx.encrypted_path().exists());
        assert!(!log.contains("Encryption complete"));
    }
}
