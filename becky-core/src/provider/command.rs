//! External tool invocation (`rsync`, `ssh`, `s3cmd`).
//!
//! Providers build an [`Invocation`] and hand it to a [`CommandRunner`].
//! Arguments are passed as a vector, never through a shell.

use crate::BackupError;
use std::ffi::OsString;
use std::io::{self, Write};
use std::process::{Command, Stdio};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
    pub stdin: Option<Vec<u8>>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    /// Arguments as lossy strings, for logging and matching.
    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

pub trait CommandRunner: Send + Sync {
    /// Run to completion. `Err` only when the process could not be started
    /// or its pipes failed; a nonzero exit is a normal `CommandOutput`.
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Feed stdin from a separate thread so a chatty child cannot
        // deadlock on a full stdout pipe.
        let writer = match (child.stdin.take(), invocation.stdin.clone()) {
            (Some(mut pipe), Some(input)) => Some(std::thread::spawn(move || pipe.write_all(&input))),
            _ => None,
        };

        let output = child.wait_with_output()?;
        if let Some(handle) = writer {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(io::Error::other("stdin writer thread panicked")),
            }
        }

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Run and require exit code 0.
pub fn run_checked(runner: &dyn CommandRunner, invocation: &Invocation) -> crate::Result<CommandOutput> {
    run_accepting(runner, invocation, &[0])
}

/// Run and require one of the `accepted` exit codes.
pub fn run_accepting(
    runner: &dyn CommandRunner,
    invocation: &Invocation,
    accepted: &[i32],
) -> crate::Result<CommandOutput> {
    tracing::debug!(program = %invocation.program, argc = invocation.args.len(), "Running command");
    let output = runner
        .run(invocation)
        .map_err(|e| BackupError::Transfer(format!("failed to start {}: {}", invocation.program, e)))?;

    match output.status {
        Some(code) if accepted.contains(&code) => Ok(output),
        Some(code) => Err(BackupError::Transfer(format!(
            "{} exited with status {}: {}",
            invocation.program,
            code,
            output.stderr_str()
        ))),
        None => Err(BackupError::Transfer(format!(
            "{} was terminated by a signal",
            invocation.program
        ))),
    }
}

/// Quote one word for a POSIX shell on the far end of `ssh`.
pub fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-process stand-ins for `rsync`, `ssh` and `s3cmd`.
    //!
    //! Remote paths (`host:/dir`) map onto the local filesystem and S3
    //! objects live in memory.

    use super::{CommandOutput, CommandRunner, Invocation};
    use md5::{Digest, Md5};
    use std::collections::{BTreeMap, HashSet};
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct FakeCommandRunner {
        calls: Mutex<Vec<Invocation>>,
        objects: Mutex<BTreeMap<String, Vec<u8>>>,
        failing: Mutex<HashSet<String>>,
    }

    fn ok(stdout: String) -> CommandOutput {
        CommandOutput {
            status: Some(0),
            stdout: stdout.into_bytes(),
            stderr: Vec::new(),
        }
    }

    fn failed(status: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            status: Some(status),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    /// `host:/dir` → `/dir`; local paths pass through.
    fn local(location: &str) -> PathBuf {
        match location.split_once(':') {
            Some((_, path)) if !location.starts_with('/') => PathBuf::from(path),
            _ => PathBuf::from(location),
        }
    }

    fn unquote(word: &str) -> String {
        word.trim_matches('\'').replace(r"'\''", "'")
    }

    /// Arguments that are not `--flags`, with any `-c <file>` pair removed.
    fn positionals(args: &[String]) -> Vec<&str> {
        let mut words = Vec::new();
        let mut args = args.iter();
        while let Some(arg) = args.next() {
            if arg == "-c" {
                args.next();
            } else if !arg.starts_with("--") {
                words.push(arg.as_str());
            }
        }
        words
    }

    fn config_file(args: &[String]) -> Option<&str> {
        let at = args.iter().position(|a| a == "-c")?;
        args.get(at + 1).map(String::as_str)
    }

    impl FakeCommandRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }

        /// Invocations of `program` whose first positional argument is `first`.
        pub fn count(&self, program: &str, first: &str) -> usize {
            self.calls()
                .iter()
                .filter(|c| c.program == program)
                .filter(|c| positionals(&c.arg_strings()).first() == Some(&first))
                .count()
        }

        pub fn fail_program(&self, program: &str) {
            self.failing.lock().unwrap().insert(program.to_string());
        }

        pub fn objects(&self) -> BTreeMap<String, Vec<u8>> {
            self.objects.lock().unwrap().clone()
        }

        pub fn corrupt_object(&self, uri: &str) {
            self.objects
                .lock()
                .unwrap()
                .insert(uri.to_string(), b"corrupted".to_vec());
        }

        fn rsync(&self, args: &[String]) -> io::Result<CommandOutput> {
            let list = args
                .iter()
                .find_map(|a| a.strip_prefix("--files-from="))
                .ok_or_else(|| io::Error::other("rsync: --files-from is required"))?;
            let locations = positionals(args);
            let (src, dst) = match locations.as_slice() {
                [src, dst] => (local(src), local(dst)),
                _ => return Ok(failed(1, "rsync: expected source and destination")),
            };

            let print_names = args.iter().any(|a| a == "--out-format=%n");
            fs::create_dir_all(&dst)?;
            let mut partial = false;
            let mut sent = String::new();
            for name in fs::read_to_string(list)?.lines().filter(|l| !l.is_empty()) {
                if fs::copy(src.join(name), dst.join(name)).is_err() {
                    partial = true;
                } else if print_names {
                    sent.push_str(name);
                    sent.push('\n');
                }
            }
            Ok(CommandOutput {
                status: Some(if partial { 23 } else { 0 }),
                stdout: sent.into_bytes(),
                stderr: if partial {
                    b"rsync: some files could not be transferred".to_vec()
                } else {
                    Vec::new()
                },
            })
        }

        fn ssh(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
            let args = invocation.arg_strings();
            let mut words = Vec::new();
            let mut iter = args.iter();
            while let Some(arg) = iter.next() {
                if arg == "-i" || arg == "-o" {
                    iter.next();
                } else {
                    words.push(arg.as_str());
                }
            }
            // words[0] is the host
            let command = &words[1..];

            if command.first() == Some(&"mkdir") {
                if let Some(path) = command.last() {
                    fs::create_dir_all(unquote(path))?;
                }
                return Ok(ok(String::new()));
            }

            if command.contains(&"md5sum") {
                let input = invocation.stdin.clone().unwrap_or_default();
                let mut stdout = String::new();
                let mut stderr = String::new();
                for path in input.split(|b| *b == 0).filter(|p| !p.is_empty()) {
                    let path = String::from_utf8_lossy(path).into_owned();
                    match fs::read(&path) {
                        Ok(content) => {
                            stdout.push_str(&format!("{:x}  {}\n", Md5::digest(&content), path));
                        }
                        Err(_) => stderr.push_str(&format!("md5sum: {}: No such file or directory\n", path)),
                    }
                }
                return Ok(CommandOutput {
                    status: Some(if stderr.is_empty() { 0 } else { 123 }),
                    stdout: stdout.into_bytes(),
                    stderr: stderr.into_bytes(),
                });
            }

            Ok(failed(127, "unsupported remote command"))
        }

        fn s3cmd(&self, args: &[String]) -> io::Result<CommandOutput> {
            let configured = config_file(args)
                .and_then(|path| fs::read_to_string(path).ok())
                .is_some_and(|config| config.contains("access_key = ") && config.contains("secret_key = "));
            if !configured {
                return Ok(failed(78, "ERROR: Missing or invalid configuration file"));
            }
            let words = positionals(args);
            let mut objects = self.objects.lock().unwrap();
            match words.as_slice() {
                ["ls", uri] => {
                    let with_md5 = args.iter().any(|a| a == "--list-md5");
                    Ok(ok(match objects.get(*uri) {
                        Some(content) if with_md5 => format!(
                            "2026-01-01 00:00  {}  {:x}  {}\n",
                            content.len(),
                            Md5::digest(content),
                            uri
                        ),
                        Some(content) => format!("2026-01-01 00:00  {}  {}\n", content.len(), uri),
                        None => String::new(),
                    }))
                }
                ["put", src, uri] => {
                    objects.insert(uri.to_string(), fs::read(Path::new(src))?);
                    Ok(ok(String::new()))
                }
                ["get", uri, dst] => match objects.get(*uri) {
                    Some(content) => {
                        let dst = Path::new(dst);
                        if dst.exists() && !args.iter().any(|a| a == "--force") {
                            return Ok(failed(1, "ERROR: Parameter problem: File exists"));
                        }
                        fs::write(dst, content)?;
                        Ok(ok(String::new()))
                    }
                    None => Ok(failed(12, "ERROR: S3 error: 404 (Not Found)")),
                },
                _ => Ok(failed(2, "unsupported s3cmd invocation")),
            }
        }
    }

    impl CommandRunner for FakeCommandRunner {
        fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(invocation.clone());
            if self.failing.lock().unwrap().contains(&invocation.program) {
                return Ok(failed(255, "connection refused"));
            }

            let args = invocation.arg_strings();
            match invocation.program.as_str() {
                "rsync" => self.rsync(&args),
                "ssh" => self.ssh(invocation),
                "s3cmd" => self.s3cmd(&args),
                other => Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{}: command not found", other),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_runner_captures_output() {
        let output = SystemCommandRunner
            .run(&Invocation::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout_str(), "out\n");
        assert_eq!(output.stderr_str(), "err");
    }

    #[test]
    fn test_system_runner_feeds_stdin() {
        let output = SystemCommandRunner
            .run(&Invocation::new("cat").stdin(b"piped".to_vec()))
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_str(), "piped");
    }

    #[test]
    fn test_run_checked_maps_failures() {
        let err = run_checked(&SystemCommandRunner, &Invocation::new("sh").args(["-c", "echo boom >&2; exit 1"]))
            .unwrap_err();
        assert!(err.to_string().contains("sh exited with status 1: boom"));

        let missing = run_checked(&SystemCommandRunner, &Invocation::new("becky-no-such-tool")).unwrap_err();
        assert!(matches!(missing, BackupError::Transfer(_)));

        assert!(run_accepting(&SystemCommandRunner, &Invocation::new("sh").args(["-c", "exit 23"]), &[0, 23]).is_ok());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/srv/backups"), "'/srv/backups'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
