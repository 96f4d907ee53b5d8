//! torrc generation
//!
//! The generated configuration runs a SOCKS listener and exactly one hidden
//! service, mapped either to the local content server or to the forwarding
//! target.

use std::fs;
use std::path::Path;

use minijinja::{context, Environment};
use tracing::debug;

use super::{TorError, TorResult};

/// SOCKS listener port written to the torrc
pub const SOCKS_PORT: u16 = 9050;

/// Port the hidden service is reachable on from the Tor network
pub const HIDDEN_SERVICE_VIRTUAL_PORT: u16 = 80;

const TORRC_TEMPLATE: &str = "\
SocksPort {{ socks_port }}
HiddenServiceDir {{ data_dir }}
{% if forward %}
HiddenServicePort {{ virtual_port }} {{ forward }}
{% else %}
HiddenServicePort {{ virtual_port }} 127.0.0.1:{{ port }}
{% endif %}
";

/// Parameters for rendering a torrc.
#[derive(Debug, Clone, Copy)]
pub struct TorrcParams<'a> {
    /// Hidden service data directory
    pub data_dir: &'a Path,
    /// Local port the content server listens on
    pub port: u16,
    /// External address to forward to instead of the local port
    pub forward: Option<&'a str>,
}

impl<'a> TorrcParams<'a> {
    fn forward_target(&self) -> Option<&'a str> {
        self.forward.map(str::trim).filter(|target| !target.is_empty())
    }
}

/// Render the torrc text.
pub fn render_torrc(params: &TorrcParams<'_>) -> TorResult<String> {
    let data_dir = normalize_path(params.data_dir)?;

    let forward = params.forward_target();
    if let Some(target) = forward {
        if target.chars().any(char::is_control) {
            return Err(TorError::InvalidForwardTarget(target.to_string()));
        }
    }

    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.add_template("torrc", TORRC_TEMPLATE)?;

    let rendered = env.get_template("torrc")?.render(context! {
        socks_port => SOCKS_PORT,
        virtual_port => HIDDEN_SERVICE_VIRTUAL_PORT,
        data_dir => data_dir,
        port => params.port,
        forward => forward,
    })?;

    Ok(rendered)
}

/// Render the torrc and write it to `path`, replacing any previous file.
///
/// The text is written to a sibling temporary file first and renamed into
/// place, so a failure never leaves a truncated torrc at `path`.
pub fn write_torrc(path: &Path, params: &TorrcParams<'_>) -> TorResult<()> {
    let contents = render_torrc(params)?;

    let tmp_path = path.with_extension("tmp");
    let result = fs::write(&tmp_path, contents).and_then(|()| fs::rename(&tmp_path, path));

    if let Err(source) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(TorError::Render {
            path: path.to_path_buf(),
            source,
        });
    }

    debug!(path = %path.display(), forward = ?params.forward_target(), "Wrote torrc");
    Ok(())
}

/// Tor expects forward slashes, including on Windows.
fn normalize_path(path: &Path) -> TorResult<String> {
    let path_str = path
        .to_str()
        .ok_or_else(|| TorError::NonUtf8Path(path.to_path_buf()))?;

    Ok(path_str.replace('\\', "/"))
}
