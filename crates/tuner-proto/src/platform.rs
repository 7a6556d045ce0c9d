use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// Fixed, well-known port of the Player's command endpoint.
pub const PLAYER_TCP_PORT: u16 = 6435;

/// Normalise a user-entered peer address.  A bare host gets the fixed
/// Player port appended; `host:port` and `[v6]:port` pass through.
pub fn peer_address(input: &str) -> String {
    let input = input.trim();
    if input.parse::<std::net::SocketAddr>().is_ok() {
        return input.to_string();
    }
    if let Ok(ip) = input.parse::<IpAddr>() {
        return std::net::SocketAddr::new(ip, PLAYER_TCP_PORT).to_string();
    }
    match input.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => input.to_string(),
        _ => format!("{}:{}", input, PLAYER_TCP_PORT),
    }
}

pub fn data_dir() -> PathBuf {
    // ~/.local/share/tuner on unix, regardless of macOS conventions
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("tuner")
    }
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let portable_data = exe_dir.join("data");
                if portable_data.exists() {
                    return portable_data;
                }
            }
        }

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tuner")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                if exe_dir.join("config.toml").exists() {
                    return exe_dir.to_path_buf();
                }
            }
        }
    }

    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("tuner")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tuner")
    }
}

#[cfg(unix)]
pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

#[cfg(windows)]
pub fn mpv_binary_name() -> &'static str {
    "mpv.exe"
}

/// Find the mpv binary: `MPV_PATH`, beside the current exe, then PATH.
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MPV_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    let exe_name = mpv_binary_name();

    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let local_mpv = dir.join(exe_name);
            if local_mpv.exists() {
                return Some(local_mpv);
            }
        }
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(exe_name))
        .find(|p| p.exists())
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    a == 10 || (a == 172 && (16..=31).contains(&b)) || (a == 192 && b == 168)
}

/// Pick the address a Remote on the same LAN should type in.
///
/// Only private IPv4 addresses qualify.  `192.168.x.x` wins over the other
/// private ranges; the first of those is kept as a fallback.
pub fn pick_lan_address<I>(candidates: I) -> Option<Ipv4Addr>
where
    I: IntoIterator<Item = IpAddr>,
{
    let mut fallback = None;
    for ip in candidates {
        let IpAddr::V4(v4) = ip else { continue };
        if v4.is_loopback() || !is_private_v4(&v4) {
            continue;
        }
        if v4.octets()[0] == 192 {
            return Some(v4);
        }
        fallback.get_or_insert(v4);
    }
    fallback
}

/// Local LAN address of this machine, if any interface has one.
pub fn local_lan_address() -> Option<Ipv4Addr> {
    match get_if_addrs::get_if_addrs() {
        Ok(ifaces) => pick_lan_address(
            ifaces
                .into_iter()
                .filter(|iface| !iface.is_loopback())
                .map(|iface| iface.ip()),
        ),
        Err(e) => {
            tracing::warn!("Failed to list network interfaces: {}", e);
            None
        }
    }
}
