//! Shared helpers for integration tests.
//!
//! The fake tor is a shell script that honours the two invocations subway
//! uses: `--version`, and `-f <torrc>`. In the latter mode it records its pid
//! next to the torrc, optionally writes a hostname file into the
//! `HiddenServiceDir` named in the torrc, and then sleeps until killed.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const FAKE_ONION: &str = "fakeonionaddressforsubwaytests.onion";

/// How the fake tor behaves once started.
#[derive(Debug, Clone, Copy)]
pub enum FakeTor {
    /// Write the hostname file after the given delay
    PublishAfter(Duration),
    /// Never write the hostname file
    Silent,
}

/// Write the fake tor script into `dir` and return its path.
pub fn install_fake_tor(dir: &Path, behaviour: FakeTor) -> PathBuf {
    let publish = match behaviour {
        FakeTor::PublishAfter(delay) => format!(
            "sleep {delay}\n\
             printf '%s\\n' '{FAKE_ONION}' > \"$datadir/hostname.tmp\"\n\
             mv \"$datadir/hostname.tmp\" \"$datadir/hostname\"\n",
            delay = delay.as_secs_f64(),
        ),
        FakeTor::Silent => String::new(),
    };

    let script = format!(
        "#!/bin/sh\n\
         if [ \"$1\" = \"--version\" ]; then\n\
         \techo 'Tor version 0.4.8.12.'\n\
         \texit 0\n\
         fi\n\
         torrc=\"$2\"\n\
         datadir=$(sed -n 's/^HiddenServiceDir //p' \"$torrc\")\n\
         echo $$ > \"$(dirname \"$torrc\")/tor.pid\"\n\
         {publish}\
         exec sleep 600\n"
    );

    let path = dir.join("fake-tor");
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Read the pid the fake tor recorded, waiting briefly for it to appear.
pub fn fake_tor_pid(work_root: &Path) -> u32 {
    let pid_file = work_root.join("tor.pid");
    for _ in 0..100 {
        if let Ok(contents) = fs::read_to_string(&pid_file) {
            if let Ok(pid) = contents.trim().parse() {
                return pid;
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("fake tor never wrote {}", pid_file.display());
}

/// Whether `pid` is a live process. Zombies count as dead.
pub fn pid_alive(pid: u32) -> bool {
    std::process::Command::new("ps")
        .args(["-o", "stat=", "-p", &pid.to_string()])
        .output()
        .map(|output| {
            let stat = String::from_utf8_lossy(&output.stdout);
            let stat = stat.trim();
            !stat.is_empty() && !stat.starts_with('Z')
        })
        .unwrap_or(false)
}

/// Find a port that is currently free on localhost.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Create a directory with an index page to serve.
pub fn make_site(dir: &Path) -> PathBuf {
    let site = dir.join("site");
    fs::create_dir_all(&site).unwrap();
    fs::write(site.join("index.html"), "<h1>served over tor</h1>").unwrap();
    site
}
