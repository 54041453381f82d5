//! Login control loop
//!
//! Owns all timing policy: when to probe, when to attempt a login, the retry
//! throttle while offline and the forced re-login ceiling while online. Every
//! login/logout exchange funnels through one mutex so a manual trigger and a
//! timer tick can never race on the same session. Portal errors never escape
//! this module; they become a status update plus a log line.

use crate::config::Config;
use crate::netcheck::{Connectivity, Probe};
use crate::portal::{is_login_success, PortalClient, PortalError};
use crate::status::{Status, StatusBoard};
use crate::wifi;
use anyhow::Result;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};

/// While online, re-authenticate anyway once this much time has passed since
/// the last verified login. Some gateways expire sessions silently without
/// dropping raw connectivity.
pub const FORCE_RELOGIN_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Touch this file to request a logout on the next tick
const LOGOUT_FLAG_PATH: &str = "logout.flag";

/// Raw body of the last verification-failed login, kept for inspection
const LOGIN_RESPONSE_ARTIFACT: &str = "last_login_response.html";

/// Latest status mirrored as JSON for headless consumers
const STATUS_FILE: &str = "status.json";

/// When the last login was attempted and when it last verified as successful.
/// `last_attempt` is recorded unconditionally and drives the offline retry
/// throttle; `last_success` drives the forced re-login ceiling.
#[derive(Debug, Clone, Copy, Default)]
struct SessionTiming {
    last_attempt: Option<Instant>,
    last_success: Option<Instant>,
}

/// What one timer tick should do, given the probe result and session timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickAction {
    /// Online with a fresh session: just report it
    PublishOnline,
    /// Offline but a login was attempted too recently: wait for the next tick
    Throttled,
    /// Attempt a login; `forced` means the probe said online but the session
    /// is stale (or was never established)
    Login { forced: bool },
}

fn decide(online: bool, timing: &SessionTiming, now: Instant, interval: Duration) -> TickAction {
    if online {
        match timing.last_success {
            Some(at) if now.duration_since(at) < FORCE_RELOGIN_INTERVAL => {
                TickAction::PublishOnline
            }
            _ => TickAction::Login { forced: true },
        }
    } else {
        match timing.last_attempt {
            Some(at) if now.duration_since(at) < interval => TickAction::Throttled,
            _ => TickAction::Login { forced: false },
        }
    }
}

pub struct Controller {
    config_path: Option<PathBuf>,
    status: StatusBoard,
    portal: PortalClient,
    probe: Box<dyn Connectivity>,
    session: Mutex<SessionTiming>,
    status_file: Option<PathBuf>,
    artifact_path: PathBuf,
    logout_flag: PathBuf,
}

impl Controller {
    pub fn new(config_path: Option<PathBuf>, status: StatusBoard) -> Result<Self> {
        Ok(Self {
            config_path,
            status,
            portal: PortalClient::new()?,
            probe: Box::new(Probe::new()?),
            session: Mutex::new(SessionTiming::default()),
            status_file: Some(PathBuf::from(STATUS_FILE)),
            artifact_path: PathBuf::from(LOGIN_RESPONSE_ARTIFACT),
            logout_flag: PathBuf::from(LOGOUT_FLAG_PATH),
        })
    }

    /// Run the periodic check/login loop until the stop signal flips.
    /// The signal is observed at the next wake-up, so shutdown latency is
    /// bounded by one tick period.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Starting control loop");
        loop {
            let interval = self.tick().await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    tracing::info!("Stop signal received, control loop exiting");
                    return;
                }
            }
        }
    }

    /// One control-loop cycle. Returns how long to sleep before the next one.
    async fn tick(&self) -> Duration {
        // Reload every tick so settings changes apply without a restart
        let cfg = match Config::load(self.config_path.as_deref()) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("Config load failed: {:#}", e);
                self.publish(false, "配置读取失败").await;
                return Duration::from_secs(5);
            }
        };
        let interval = cfg.interval();

        if self.take_logout_flag(&cfg).await {
            return interval;
        }

        if !self.on_target_network(&cfg) {
            return interval;
        }

        let online = self.probe.is_online().await;
        let action = {
            let timing = self.session.lock().await;
            decide(online, &timing, Instant::now(), interval)
        };

        match action {
            TickAction::PublishOnline => {
                self.publish(true, "在线").await;
            }
            TickAction::Throttled => {
                self.publish(false, "离线，等待重试").await;
            }
            TickAction::Login { forced } => {
                if forced {
                    tracing::info!("Online but forcing re-login (session may be stale)");
                } else {
                    tracing::info!("Offline, attempting login");
                }
                self.login_attempt(&cfg).await;
            }
        }

        interval
    }

    /// One manual or CLI-driven pass: probe, and login only if offline
    pub async fn check_once(&self) -> Status {
        let cfg = match Config::load(self.config_path.as_deref()) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("Config load failed: {:#}", e);
                return self.publish(false, "配置读取失败").await;
            }
        };

        if !self.on_target_network(&cfg) {
            return self.publish(false, "未连接到目标网络").await;
        }

        if self.probe.is_online().await {
            tracing::info!("Already online");
            return self.publish(true, "在线").await;
        }

        self.login_attempt(&cfg).await
    }

    /// Manual login trigger: no timer, no throttle, but the same session
    /// mutex as the timer-driven path
    pub async fn login_now(&self) -> Status {
        match Config::load(self.config_path.as_deref()) {
            Ok(cfg) => self.login_attempt(&cfg).await,
            Err(e) => {
                tracing::warn!("Config load failed: {:#}", e);
                self.publish(false, "配置读取失败").await
            }
        }
    }

    /// Manual logout trigger
    pub async fn logout_now(&self) -> Status {
        match Config::load(self.config_path.as_deref()) {
            Ok(cfg) => self.logout_attempt(&cfg).await,
            Err(e) => {
                tracing::warn!("Config load failed: {:#}", e);
                self.publish(false, "配置读取失败").await
            }
        }
    }

    /// Does the configured Wi-Fi restriction allow this tick to proceed?
    /// Skipped ticks leave session timing untouched, so time spent on the
    /// wrong network does not count toward the forced re-login window.
    fn on_target_network(&self, cfg: &Config) -> bool {
        if cfg.wifi_ssid.is_empty() {
            return true;
        }
        match wifi::current_ssid() {
            Ok(Some(ssid)) if ssid == cfg.wifi_ssid => true,
            Ok(Some(ssid)) => {
                tracing::info!("On '{}' (target '{}'), skipping", ssid, cfg.wifi_ssid);
                false
            }
            Ok(None) => {
                tracing::info!("Wi-Fi not connected, skipping");
                false
            }
            Err(e) => {
                tracing::warn!("Wi-Fi query failed: {}", e);
                false
            }
        }
    }

    /// If the logout flag file exists, perform a logout and consume the flag.
    /// The flag is one-shot: removed whether or not the logout succeeded.
    async fn take_logout_flag(&self, cfg: &Config) -> bool {
        match tokio::fs::try_exists(&self.logout_flag).await {
            Ok(true) => {}
            _ => return false,
        }

        tracing::info!("Logout flag detected, logging out");
        self.logout_attempt(cfg).await;
        if let Err(e) = tokio::fs::remove_file(&self.logout_flag).await {
            tracing::warn!("Failed to remove logout flag: {}", e);
        }
        true
    }

    async fn login_attempt(&self, cfg: &Config) -> Status {
        let portal_cfg = cfg.prepared_portal();

        // Hold the session lock across the whole exchange: at most one
        // login/logout request in flight at any time.
        let mut timing = self.session.lock().await;
        let result = self.portal.login(&portal_cfg).await;
        timing.last_attempt = Some(Instant::now());

        match result {
            Ok(body) => {
                if is_login_success(&body, &portal_cfg) {
                    timing.last_success = Some(Instant::now());
                    tracing::info!("Login success");
                    self.publish(true, "登录成功").await
                } else {
                    tracing::warn!("Login response did not match success keywords");
                    self.persist_artifact(&body).await;
                    self.publish(false, "登录可能失败（网关响应异常）").await
                }
            }
            Err(PortalError::EmptyLoginUrl) => {
                tracing::warn!("Login skipped: login_url is not configured");
                self.publish(false, "登录地址未配置").await
            }
            Err(PortalError::Timeout(e)) => {
                tracing::warn!("Login timed out: {}", e);
                self.publish(false, "登录超时").await
            }
            Err(PortalError::Network(e)) => {
                tracing::warn!("Login failed: {}", e);
                self.publish(false, "登录失败").await
            }
        }
    }

    async fn logout_attempt(&self, cfg: &Config) -> Status {
        let portal_cfg = cfg.prepared_portal();

        let mut timing = self.session.lock().await;
        let result = self.portal.logout(&portal_cfg).await;
        timing.last_attempt = Some(Instant::now());

        match result {
            Ok(body) => {
                if !body.is_empty() && !is_login_success(&body, &portal_cfg) {
                    tracing::warn!("Logout response may not indicate success");
                    self.publish(false, "注销可能失败（检查浏览器）").await
                } else {
                    tracing::info!("Logout finished");
                    self.publish(false, "注销完成").await
                }
            }
            Err(e) => {
                tracing::warn!("Logout failed: {}", e);
                self.publish(false, "注销失败").await
            }
        }
    }

    /// Diagnostic only; a write failure must not abort the login flow
    async fn persist_artifact(&self, body: &str) {
        if let Err(e) = tokio::fs::write(&self.artifact_path, body).await {
            tracing::warn!(
                "Failed to write {}: {}",
                self.artifact_path.display(),
                e
            );
        } else {
            tracing::info!(
                "Gateway response saved to {}",
                self.artifact_path.display()
            );
        }
    }

    async fn publish(&self, online: bool, message: &str) -> Status {
        let status = self.status.set(online, message);
        if let Some(path) = &self.status_file {
            self.status.mirror_to_file(path).await;
        }
        status
    }
}
