//! Modem transport (component A): AT-command session, NTP time sync, GNSS,
//! and HTTP-over-modem, grounded on the Quectel EC800M AT command surface
//! described in SPEC_FULL.md §4.A.

mod gnss;
mod session;

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use gnss::{parse_gsv_sentences, parse_qgpsloc, GnssFix, SatelliteInfo};
pub use session::AtHandle;

use crate::config::ModemConfig;
use crate::error::{ControllerError, Result};

pub enum HttpMethod {
    Get,
    Post,
}

pub struct HttpOutcome {
    pub status: u32,
    pub body: Vec<u8>,
}

pub struct ModemTransport {
    at: AtHandle,
    /// Held across an entire HTTP request/response cycle (§4.A) so a
    /// concurrent caller cannot interleave AT commands into someone else's
    /// in-flight transaction.
    http_session_lock: Mutex<()>,
    time_offset_s: AtomicI64,
}

impl ModemTransport {
    pub async fn open(config: &ModemConfig) -> Result<Self> {
        let at = session::spawn(&config.serial_port, config.baud_rate).await?;
        Ok(Self {
            at,
            http_session_lock: Mutex::new(()),
            time_offset_s: AtomicI64::new(0),
        })
    }

    pub async fn initialize_module(&self) -> Result<()> {
        // Non-fatal: some firmwares reject ATE0 once echo is already off.
        let _ = self.at.send_ok("ATE0", Duration::from_secs(2)).await;

        self.at.send_ok("AT", Duration::from_secs(2)).await.map_err(|_| {
            ControllerError::ModuleOperation {
                command: "AT".to_string(),
                detail: "modem unresponsive".to_string(),
            }
        })?;

        self.at.send_ok("AT+CPIN?", Duration::from_secs(5)).await?;
        self.at.send_ok("AT+CGREG?", Duration::from_secs(5)).await?;
        info!("modem module initialized");
        Ok(())
    }

    pub async fn check_and_activate_pdp(&self, context_id: u8, apn: &str) -> Result<()> {
        let status = self.at.send_ok("AT+QIACT?", Duration::from_secs(5)).await;
        if let Ok(lines) = status {
            if lines.iter().any(|l| l.contains(&format!("+QIACT: {context_id},1"))) {
                return Ok(());
            }
        }

        let cfg_cmd = format!("AT+QICSGP={context_id},1,\"{apn}\",\"\",\"\",0");
        self.at.send_ok(&cfg_cmd, Duration::from_secs(5)).await?;

        let act_cmd = format!("AT+QIACT={context_id}");
        self.at
            .send_ok(&act_cmd, Duration::from_secs(150))
            .await
            .map_err(|e| ControllerError::Network {
                detail: format!("PDP activation failed: {e}"),
            })?;
        Ok(())
    }

    pub async fn sync_time_with_ntp(&self, server: &str) -> Result<()> {
        self.check_and_activate_pdp(1, "").await.ok();
        let cmd = format!("AT+QNTP=1,\"{server}\"");
        self.at.send_ok(&cmd, Duration::from_secs(5)).await?;

        let urc = self
            .at
            .send("AT", &["+QNTP:"], Duration::from_secs(65))
            .await?;
        let ok = urc.iter().any(|l| l.contains("+QNTP: 0"));
        if !ok {
            return Err(ControllerError::Network {
                detail: "NTP sync did not report success code 0".to_string(),
            });
        }

        let cclk = self.at.send_ok("AT+CCLK?", Duration::from_secs(5)).await?;
        let line = cclk
            .iter()
            .find(|l| l.contains("+CCLK:"))
            .ok_or_else(|| ControllerError::Parse {
                what: "CCLK".to_string(),
                detail: "no +CCLK line in response".to_string(),
            })?;
        self.apply_cclk_offset(line)?;
        Ok(())
    }

    fn apply_cclk_offset(&self, line: &str) -> Result<()> {
        // "+CCLK: "yy/MM/dd,HH:mm:ss±tz""
        let quoted = line
            .split('"')
            .nth(1)
            .ok_or_else(|| ControllerError::Parse {
                what: "CCLK".to_string(),
                detail: line.to_string(),
            })?;
        let sign_pos = quoted
            .rfind(['+', '-'])
            .ok_or_else(|| ControllerError::Parse {
                what: "CCLK timezone".to_string(),
                detail: quoted.to_string(),
            })?;
        let (datetime_part, tz_part) = quoted.split_at(sign_pos);
        let tz_quarters: i64 = tz_part.parse().unwrap_or(0);
        let tz_offset_hours = tz_quarters as f64 / 4.0;

        let naive = chrono::NaiveDateTime::parse_from_str(datetime_part, "%y/%m/%d,%H:%M:%S")
            .map_err(|e| ControllerError::Parse {
                what: "CCLK datetime".to_string(),
                detail: e.to_string(),
            })?;
        let module_utc = naive.and_utc().timestamp() - (tz_offset_hours * 3600.0) as i64;
        let local_utc = chrono::Utc::now().timestamp();
        self.time_offset_s.store(module_utc - local_utc, Ordering::Relaxed);
        debug!(offset = module_utc - local_utc, "modem time offset updated");
        Ok(())
    }

    pub fn accurate_timestamp_ms(&self) -> i64 {
        let offset = self.time_offset_s.load(Ordering::Relaxed);
        (chrono::Utc::now().timestamp() + offset) * 1000
    }

    pub async fn gnss_start(&self) -> Result<()> {
        let _ = self.at.send_ok("AT+QGPSEND", Duration::from_secs(3)).await;
        let _ = self
            .at
            .send_ok("AT+QGPSCFG=\"gnssconfig\",1", Duration::from_secs(3))
            .await;
        self.at
            .send_ok("AT+QGPS=1", Duration::from_secs(5))
            .await
            .map_err(|_| ControllerError::GnssFix { attempts: 0 })?;
        Ok(())
    }

    pub async fn gnss_stop(&self) -> Result<()> {
        self.at.send_ok("AT+QGPSEND", Duration::from_secs(3)).await?;
        Ok(())
    }

    pub async fn get_gnss_location(&self, retries: u32, interval: Duration) -> Result<GnssFix> {
        for attempt in 1..=retries {
            match self
                .at
                .send("AT+QGPSLOC=0", &["+QGPSLOC:"], Duration::from_secs(3))
                .await
            {
                Ok(lines) => {
                    if let Some(line) = lines.iter().find(|l| l.contains("+QGPSLOC:")) {
                        if let Ok(fix) = parse_qgpsloc(line) {
                            return Ok(fix);
                        }
                    }
                }
                Err(e) => warn!("GNSS fix attempt {attempt}/{retries} failed: {e}"),
            }
            tokio::time::sleep(interval).await;
        }
        Err(ControllerError::GnssFix { attempts: retries })
    }

    pub async fn get_satellites_info(&self) -> Result<SatelliteInfo> {
        let lines = self
            .at
            .send_ok("AT+QGPSGNMEA=\"GSV\"", Duration::from_secs(3))
            .await?;
        Ok(parse_gsv_sentences(&lines.join("\n")))
    }

    /// HTTP over the modem, serialized end-to-end by `http_session_lock`.
    pub async fn http_request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<HttpOutcome> {
        let _session = self.http_session_lock.lock().await;
        self.check_and_activate_pdp(1, "").await.ok();

        self.at
            .send_ok("AT+QHTTPCFG=\"contextid\",1", Duration::from_secs(3))
            .await?;
        if url.starts_with("https") {
            self.at
                .send_ok("AT+QHTTPCFG=\"sslctxid\",1", Duration::from_secs(3))
                .await?;
        }
        if matches!(method, HttpMethod::Post) {
            self.at
                .send_ok("AT+QHTTPCFG=\"requestheader\",1", Duration::from_secs(3))
                .await
                .ok();
        }

        let url_cmd = format!("AT+QHTTPURL={},{}", url.len(), timeout.as_secs());
        self.at.send(&url_cmd, &["CONNECT"], Duration::from_secs(30)).await?;
        self.at.send_ok(url, Duration::from_secs(10)).await?;

        let result = match method {
            HttpMethod::Get => {
                let cmd = format!("AT+QHTTPGET={}", timeout.as_secs());
                self.at.send(&cmd, &["+QHTTPGET:"], timeout + Duration::from_secs(10)).await?
            }
            HttpMethod::Post => {
                let payload: Vec<u8> = body.map(|b| b.to_vec()).unwrap_or_else(|| b"{}".to_vec());
                let post_cmd = format!(
                    "AT+QHTTPPOST={},{},{}",
                    payload.len(),
                    timeout.as_secs(),
                    timeout.as_secs()
                );
                self.at
                    .send(&post_cmd, &["CONNECT"], timeout.max(Duration::from_secs(60)))
                    .await?;
                if !payload.is_empty() {
                    self.at
                        .send_ok(&String::from_utf8_lossy(&payload), Duration::from_secs(10))
                        .await?;
                }
                self.at
                    .send("AT", &["+QHTTPPOST:"], timeout + Duration::from_secs(10))
                    .await?
            }
        };

        let (err_code, status) = parse_http_urc(&result)?;
        if err_code != 0 {
            let _ = self.at.send_ok("AT+QHTTPSTOP", Duration::from_secs(3)).await;
            return Err(ControllerError::HttpRequest {
                command: "QHTTPGET/QHTTPPOST".to_string(),
                raw_response: result.join("|"),
            });
        }

        let read_outcome = self.read_http_response(timeout).await;
        let _ = self.at.send_ok("AT+QHTTPSTOP", Duration::from_secs(3)).await;

        Ok(HttpOutcome {
            status,
            body: read_outcome?,
        })
    }

    async fn read_http_response(&self, timeout: Duration) -> Result<Vec<u8>> {
        let cmd = format!("AT+QHTTPREAD={}", timeout.as_secs());
        let lines = self
            .at
            .send(&cmd, &["+QHTTPREAD: 0"], timeout + Duration::from_secs(10))
            .await?;

        let mut body = Vec::new();
        for line in &lines {
            if line.starts_with("+QHTTPREAD:") {
                if !line.contains("+QHTTPREAD: 0") {
                    return Err(ControllerError::HttpRequest {
                        command: "QHTTPREAD".to_string(),
                        raw_response: line.clone(),
                    });
                }
                continue;
            }
            if line == "CONNECT" {
                continue;
            }
            body.extend_from_slice(line.as_bytes());
        }
        Ok(body)
    }
}

fn parse_http_urc(lines: &[String]) -> Result<(u32, u32)> {
    let line = lines
        .iter()
        .find(|l| l.contains("+QHTTPGET:") || l.contains("+QHTTPPOST:"))
        .ok_or_else(|| ControllerError::Parse {
            what: "HTTP URC".to_string(),
            detail: lines.join("|"),
        })?;
    let body = line.split_once(':').map(|(_, r)| r.trim()).unwrap_or("");
    let fields: Vec<&str> = body.split(',').collect();
    let err_code: u32 = fields.first().and_then(|s| s.parse().ok()).unwrap_or(1);
    let status: u32 = fields.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
    Ok((err_code, status))
}
