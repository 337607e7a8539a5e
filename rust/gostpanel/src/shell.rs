use anyhow::{anyhow, Result};
use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, info};

fn unique_tmp_prefix(cmd: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_nanos();
    let pid = std::process::id();
    let safe = cmd.replace('/', "_");
    format!("gostpanel_{safe}_{pid}_{ts}")
}

fn drain(p: &Path) -> String {
    let s = fs::read(p)
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default();
    let _ = fs::remove_file(p);
    s
}

/// Run a command with a timeout, returning its exit code and combined output.
///
/// stdout/stderr go to temp files so a chatty child can't fill a pipe and
/// stall. On timeout the child is killed and an error is returned.
pub fn run_timeout(cmd: &str, args: &[&str], timeout: Duration) -> Result<(i32, String)> {
    info!("exec(timeout={:?}): {} {}", timeout, cmd, args.join(" "));

    let prefix = unique_tmp_prefix(cmd);
    let tmp_dir = std::env::temp_dir();
    let out_path: PathBuf = tmp_dir.join(format!("{prefix}.out"));
    let err_path: PathBuf = tmp_dir.join(format!("{prefix}.err"));
    let fo = fs::File::create(&out_path)
        .map_err(|e| anyhow!("failed to create stdout temp file {out_path:?}: {e}"))?;
    let fe = fs::File::create(&err_path)
        .map_err(|e| anyhow!("failed to create stderr temp file {err_path:?}: {e}"))?;

    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(fo))
        .stderr(Stdio::from(fe))
        .spawn()
        .map_err(|e| {
            let _ = fs::remove_file(&out_path);
            let _ = fs::remove_file(&err_path);
            anyhow!("failed to spawn {cmd}: {e}")
        })?;
    let start = Instant::now();

    loop {
        if let Some(st) = child.try_wait().map_err(|e| anyhow!("failed to wait {cmd}: {e}"))? {
            let code = st.code().unwrap_or(-1);
            let mut s = drain(&out_path);
            s.push_str(&drain(&err_path));
            debug!("exit={code} output_len={}", s.len());
            return Ok((code, s));
        }

        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            let mut s = drain(&out_path);
            s.push_str(&drain(&err_path));
            return Err(anyhow!(
                "command timeout after {:?}: {cmd} {}\n{}",
                timeout,
                args.join(" "),
                s
            ));
        }

        thread::sleep(Duration::from_millis(50));
    }
}

/// Like [`run_timeout`], but a non-zero exit is an error.
pub fn ok_timeout(cmd: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let (code, out) = run_timeout(cmd, args, timeout)?;
    if code != 0 {
        return Err(anyhow!(
            "command failed ({code}): {cmd} {} | out={}",
            args.join(" "),
            out.trim_end()
        ));
    }
    Ok(out)
}
