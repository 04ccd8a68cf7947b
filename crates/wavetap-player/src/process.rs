//! Child process plumbing: spawning from templates, signals, termination.

use std::io;
use std::os::fd::AsRawFd;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::config::CommandTemplate;
use crate::error::{ProcessRole, Result, SupervisorError};

/// Everything needed to render a template into an argv.
#[derive(Clone, Debug)]
pub struct SpawnRequest<'a> {
    pub url: &'a str,
    pub token: &'a str,
    pub header_name: &'a str,
}

fn command_for(template: &CommandTemplate, req: &SpawnRequest<'_>) -> Command {
    let mut cmd = Command::new(&template.program);
    cmd.args(template.render_args(req.url, req.token, req.header_name));
    cmd
}

/// Launch the audible player. Its diagnostics are discarded.
pub fn spawn_player(template: &CommandTemplate, req: &SpawnRequest<'_>) -> Result<Child> {
    let child = command_for(template, req)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| SupervisorError::Spawn {
            role: ProcessRole::Player,
            source,
        })?;
    tracing::debug!(pid = child.id(), program = %template.program, "player spawned");
    Ok(child)
}

/// Launch the sampler with stdout piped and switched to non-blocking reads.
/// The child is killed again if the pipe cannot be prepared.
pub fn spawn_sampler(
    template: &CommandTemplate,
    req: &SpawnRequest<'_>,
) -> Result<(Child, ChildStdout)> {
    let mut child = command_for(template, req)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| SupervisorError::Spawn {
            role: ProcessRole::Sampler,
            source,
        })?;

    let prepared = match child.stdout.take() {
        Some(stdout) => set_nonblocking(&stdout)
            .map(|()| stdout)
            .map_err(|e| SupervisorError::Pipe(format!("set O_NONBLOCK: {e}"))),
        None => Err(SupervisorError::Pipe("sampler stdout not captured".into())),
    };
    match prepared {
        Ok(stdout) => {
            tracing::debug!(pid = child.id(), program = %template.program, "sampler spawned");
            Ok((child, stdout))
        }
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(err)
        }
    }
}

pub fn set_nonblocking(fd: &impl AsRawFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: fcntl on a descriptor we own for the duration of the call.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Deliver `signal` to a live child. Fails if the process is already reaped.
pub fn send_signal(child: &Child, role: ProcessRole, signal: libc::c_int) -> Result<()> {
    let pid = libc::pid_t::try_from(child.id()).map_err(|_| SupervisorError::Signal {
        role,
        source: io::Error::from(io::ErrorKind::InvalidInput),
    })?;
    // SAFETY: plain kill(2) on a pid we spawned and have not yet waited on.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc != 0 {
        return Err(SupervisorError::Signal {
            role,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

pub fn suspend(child: &Child, role: ProcessRole) -> Result<()> {
    send_signal(child, role, libc::SIGSTOP)
}

pub fn resume(child: &Child, role: ProcessRole) -> Result<()> {
    send_signal(child, role, libc::SIGCONT)
}

/// Request termination of every child and wait up to `grace` for all of them
/// (one shared deadline), then force-kill and reap whatever is left.
///
/// A stopped process cannot act on SIGTERM, so each one is continued first.
/// Every child is reaped before this returns.
pub fn terminate_all(
    children: &mut [(ProcessRole, &mut Child)],
    grace: Duration,
    poll: Duration,
) -> Vec<Option<ExitStatus>> {
    let mut statuses: Vec<Option<ExitStatus>> = vec![None; children.len()];
    for (i, (role, child)) in children.iter_mut().enumerate() {
        if let Ok(Some(status)) = child.try_wait() {
            statuses[i] = Some(status);
            continue;
        }
        let _ = resume(child, *role);
        if let Err(e) = send_signal(child, *role, libc::SIGTERM) {
            tracing::debug!(error = %e, role = %role, "SIGTERM not delivered");
        }
    }

    let deadline = Instant::now() + grace;
    let poll = poll.max(Duration::from_millis(1));
    loop {
        for (i, (role, child)) in children.iter_mut().enumerate() {
            if statuses[i].is_some() {
                continue;
            }
            match child.try_wait() {
                Ok(Some(status)) => statuses[i] = Some(status),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, role = %role, "wait failed during shutdown"),
            }
        }
        if statuses.iter().all(Option::is_some) {
            return statuses;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(poll.min(deadline - now));
    }

    for (i, (role, child)) in children.iter_mut().enumerate() {
        if statuses[i].is_some() {
            continue;
        }
        tracing::warn!(pid = child.id(), role = %role, "grace period elapsed; killing");
        let _ = child.kill();
        statuses[i] = child.wait().ok();
    }
    statuses
}

/// Single-child form of [`terminate_all`].
pub fn terminate(
    child: &mut Child,
    role: ProcessRole,
    grace: Duration,
    poll: Duration,
) -> Option<ExitStatus> {
    terminate_all(&mut [(role, child)], grace, poll)
        .pop()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn sh(script: &str) -> CommandTemplate {
        CommandTemplate::new("/bin/sh", ["-c", script])
    }

    fn req() -> SpawnRequest<'static> {
        SpawnRequest {
            url: "http://media.invalid/a.flac",
            token: "tok",
            header_name: "X-Plex-Token",
        }
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let template = CommandTemplate::new("/nonexistent/wavetap-player-bin", Vec::<String>::new());
        let err = spawn_player(&template, &req()).unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Spawn {
                role: ProcessRole::Player,
                ..
            }
        ));
    }

    #[test]
    fn sampler_stdout_is_nonblocking() {
        let (mut child, mut stdout) = spawn_sampler(&sh("sleep 5"), &req()).unwrap();
        let mut buf = [0u8; 16];
        let err = stdout.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        terminate(
            &mut child,
            ProcessRole::Sampler,
            Duration::from_secs(2),
            Duration::from_millis(10),
        );
    }

    #[test]
    fn terminate_kills_processes_that_ignore_sigterm() {
        let mut child = spawn_player(&sh("trap '' TERM; sleep 5"), &req()).unwrap();
        // Give the shell a moment to install the trap.
        std::thread::sleep(Duration::from_millis(100));
        let start = Instant::now();
        let status = terminate(
            &mut child,
            ProcessRole::Player,
            Duration::from_millis(200),
            Duration::from_millis(10),
        );
        assert!(status.is_some());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn terminate_reaps_a_stopped_child() {
        let mut child = spawn_player(&sh("sleep 30"), &req()).unwrap();
        suspend(&child, ProcessRole::Player).unwrap();
        let status = terminate(
            &mut child,
            ProcessRole::Player,
            Duration::from_secs(2),
            Duration::from_millis(10),
        );
        assert!(status.is_some());
    }

    #[test]
    fn grace_period_is_shared_between_children() {
        let mut a = spawn_player(&sh("trap '' TERM; sleep 5"), &req()).unwrap();
        let mut b = spawn_player(&sh("trap '' TERM; sleep 5"), &req()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        let start = Instant::now();
        let statuses = terminate_all(
            &mut [(ProcessRole::Player, &mut a), (ProcessRole::Sampler, &mut b)],
            Duration::from_millis(500),
            Duration::from_millis(10),
        );
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(Option::is_some));
        assert!(start.elapsed() < Duration::from_millis(900), "{:?}", start.elapsed());
    }

    #[test]
    fn signalling_a_reaped_child_fails() {
        let mut child = spawn_player(&sh("exit 0"), &req()).unwrap();
        child.wait().unwrap();
        assert!(suspend(&child, ProcessRole::Player).is_err());
    }
}
