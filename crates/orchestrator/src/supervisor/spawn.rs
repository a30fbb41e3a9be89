use crate::error::Error;
use nix::unistd::{ForkResult, fork};
use std::collections::BTreeMap;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tracing::debug;

const GATE_PATH_MAX: usize = 4096;
const GATE_POLL_US: libc::c_uint = 300_000;

/// Write `prefix`, the decimal `pid`, `suffix` and a trailing NUL into
/// `out` without allocating. Returns the length before the NUL, or `None`
/// if `out` is too small.
pub fn compose_pid_path(prefix: &[u8], pid: u32, suffix: &[u8], out: &mut [u8]) -> Option<usize> {
    let mut digits = [0u8; 10];
    let mut value = pid;
    let mut count = 0;
    loop {
        digits[count] = b'0' + (value % 10) as u8;
        count += 1;
        value /= 10;
        if value == 0 {
            break;
        }
    }

    let len = prefix.len() + count + suffix.len();
    if len + 1 > out.len() {
        return None;
    }
    out[..prefix.len()].copy_from_slice(prefix);
    for (slot, digit) in out[prefix.len()..prefix.len() + count]
        .iter_mut()
        .zip(digits[..count].iter().rev())
    {
        *slot = *digit;
    }
    out[prefix.len() + count..len].copy_from_slice(suffix);
    out[len] = 0;
    Some(len)
}

/// Everything the forked child needs, prepared before the fork.
pub(crate) struct ExecPlan {
    program: CString,
    argv: Vec<CString>,
    env: Vec<CString>,
    gate_prefix: Vec<u8>,
}

impl ExecPlan {
    /// `gate_prefix` is the per-pid log path without the pid and `.log`
    /// suffix; the child waits for that file before exec.
    pub(crate) fn new(
        path: &Path,
        args: &[String],
        overrides: &BTreeMap<String, String>,
        gate_prefix: &Path,
    ) -> Result<Self, Error> {
        let invalid = |what: &str| Error::Launch {
            path: path.to_owned(),
            reason: format!("{what} contains a NUL byte"),
        };

        let program = CString::new(path.as_os_str().as_bytes()).map_err(|_| invalid("path"))?;
        let argv = if args.is_empty() {
            vec![program.clone()]
        } else {
            args.iter()
                .map(|arg| CString::new(arg.as_bytes()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| invalid("argument"))?
        };

        let mut env = Vec::new();
        for (key, value) in std::env::vars_os() {
            if overrides.keys().any(|k| k.as_bytes() == key.as_bytes()) {
                continue;
            }
            let mut entry = key.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            if let Ok(entry) = CString::new(entry) {
                env.push(entry);
            }
        }
        for (key, value) in overrides {
            env.push(CString::new(format!("{key}={value}")).map_err(|_| invalid("environment"))?);
        }

        Ok(Self {
            program,
            argv,
            env,
            gate_prefix: gate_prefix.as_os_str().as_bytes().to_vec(),
        })
    }
}

/// Fork, start a new session in the child, wait for the gate file and exec.
///
/// The child only calls async-signal-safe functions: all buffers are built
/// by [`ExecPlan::new`] in the parent.
#[allow(unsafe_code)]
pub(crate) fn fork_exec(plan: &ExecPlan) -> Result<u32, Error> {
    let argv: Vec<*const libc::c_char> = plan
        .argv
        .iter()
        .map(|arg| arg.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();
    let envp: Vec<*const libc::c_char> = plan
        .env
        .iter()
        .map(|entry| entry.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();

    // SAFETY: the child touches only pre-built buffers and async-signal-safe
    // calls until execve or _exit.
    let forked = unsafe { fork() }.map_err(|errno| Error::Launch {
        path: std::path::PathBuf::from(std::ffi::OsStr::from_bytes(plan.program.as_bytes())),
        reason: format!("fork failed: {errno}"),
    })?;
    match forked {
        ForkResult::Parent { child } => {
            let pid = child.as_raw() as u32;
            debug!(pid, program = ?plan.program, "forked launch child");
            Ok(pid)
        }
        ForkResult::Child => {
            let _ = nix::unistd::setsid();
            let pid = nix::unistd::getpid().as_raw() as u32;
            let mut gate = [0u8; GATE_PATH_MAX];
            if compose_pid_path(&plan.gate_prefix, pid, b".log", &mut gate).is_some() {
                // SAFETY: `gate` is NUL terminated by compose_pid_path.
                while unsafe { libc::access(gate.as_ptr().cast(), libc::F_OK) } != 0 {
                    unsafe { libc::usleep(GATE_POLL_US) };
                }
            }
            // SAFETY: program, argv and envp are NUL terminated and outlive
            // the call; _exit never returns.
            unsafe {
                libc::execve(plan.program.as_ptr(), argv.as_ptr(), envp.as_ptr());
                libc::_exit(127)
            }
        }
    }
}
