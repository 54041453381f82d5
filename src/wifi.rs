//! Current Wi-Fi network name
//!
//! The controller only needs "which SSID am I on, if any"; the answer comes
//! from the platform's own tooling (`netsh` on Windows, `nmcli` elsewhere).
//! `Ok(None)` means not connected to any wireless network.

use anyhow::Result;
use std::process::Command;

#[cfg(target_os = "windows")]
pub fn current_ssid() -> Result<Option<String>> {
    let output = Command::new("netsh")
        .args(["wlan", "show", "interfaces"])
        .output()?;
    let stdout = String::from_utf8_lossy(&output.stdout).replace("\r\n", "\n");
    Ok(parse_netsh_ssid(&stdout))
}

#[cfg(not(target_os = "windows"))]
pub fn current_ssid() -> Result<Option<String>> {
    let output = Command::new("nmcli")
        .args(["-t", "-f", "active,ssid", "dev", "wifi"])
        .output()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_nmcli_ssid(&stdout))
}

#[cfg(any(target_os = "windows", test))]
fn netsh_ssid_pattern() -> &'static regex::Regex {
    use std::sync::OnceLock;
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"(?m)^\s*SSID\s*:\s*(.+)$").expect("netsh SSID pattern must compile")
    })
}

#[cfg(any(target_os = "windows", test))]
fn parse_netsh_ssid(output: &str) -> Option<String> {
    netsh_ssid_pattern()
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|ssid| !ssid.is_empty())
}

#[cfg(any(not(target_os = "windows"), test))]
fn parse_nmcli_ssid(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("yes:"))
        .map(str::to_string)
        .filter(|ssid| !ssid.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netsh_output_yields_first_ssid_line() {
        let output = "\
    Name                   : WLAN\n\
    State                  : connected\n\
    SSID                   : CUMT_Stu\n\
    BSSID                  : aa:bb:cc:dd:ee:ff\n";
        assert_eq!(parse_netsh_ssid(output), Some("CUMT_Stu".to_string()));
    }

    #[test]
    fn netsh_output_without_ssid_is_disconnected() {
        let output = "    Name : WLAN\n    State : disconnected\n";
        assert_eq!(parse_netsh_ssid(output), None);
    }

    #[test]
    fn nmcli_output_yields_active_ssid() {
        let output = "no:OtherNet\nyes:CUMT_Stu\n";
        assert_eq!(parse_nmcli_ssid(output), Some("CUMT_Stu".to_string()));
    }

    #[test]
    fn nmcli_without_active_connection_is_disconnected() {
        let output = "no:OtherNet\n";
        assert_eq!(parse_nmcli_ssid(output), None);
    }
}
