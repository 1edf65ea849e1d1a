//! Inspects the certificate a live endpoint serves.

use acme::ParsedCertificate;
use async_trait::async_trait;
use chrono::Utc;
use db::models::LogLevel;
use serde_json::json;

use crate::config::MonitorConfig;
use crate::probe::ProbeTarget;
use crate::services::NodeServices;
use crate::state::keys;
use crate::traits::{ExecutableNode, NodeContext, NodeOutcome};
use crate::NodeError;

pub const MONITOR_ATTEMPTS: u32 = 3;

pub struct MonitorCertificateNode {
    services: NodeServices,
}

impl MonitorCertificateNode {
    pub fn new(services: NodeServices) -> Self {
        Self { services }
    }

    fn evaluate(&self, ctx: &NodeContext<'_>, domain: &str, der: &[u8]) -> Result<NodeOutcome, NodeError> {
        let parsed = ParsedCertificate::from_der(der)?;
        let now = Utc::now();
        let in_window = parsed.is_valid_at(now);
        let covers_domain = parsed.matches_hostname(domain);
        let days_left = (parsed.valid_to - now).num_days();

        if !in_window {
            ctx.logger.warn(format!(
                "certificate is outside its validity window ({} .. {})",
                parsed.valid_from, parsed.valid_to
            ));
        }
        if !covers_domain {
            ctx.logger.warn(format!("certificate does not cover '{domain}'"));
        }
        ctx.logger.with_data(
            LogLevel::Info,
            "certificate inspected",
            json!({
                "commonName": parsed.common_name,
                "subjectAltNames": parsed.subject_alt_names,
                "issuer": parsed.issuer_org,
                "serialNumber": parsed.serial_number,
                "validTo": parsed.valid_to,
                "daysLeft": days_left,
            }),
        );

        Ok(NodeOutcome::new()
            .variable(keys::CERTIFICATE_VALIDITY, in_window && covers_domain)
            .variable(keys::CERTIFICATE_DAYS_LEFT, days_left))
    }
}

#[async_trait]
impl ExecutableNode for MonitorCertificateNode {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let cfg: MonitorConfig = ctx.config()?;
        if cfg.host.trim().is_empty() {
            return Err(NodeError::Config("host is required".into()));
        }
        let target = ProbeTarget {
            host: cfg.host.trim().to_string(),
            port: cfg.port,
            domain: cfg.domain().trim().to_string(),
            request_path: cfg.request_path.clone(),
        };

        let mut last_error = None;
        for attempt in 1..=MONITOR_ATTEMPTS {
            ctx.check_cancelled()?;
            match ctx.until_cancelled(self.services.probe.fetch_leaf(&target)).await {
                Ok(der) => return self.evaluate(ctx, &target.domain, &der),
                Err(NodeError::Cancelled) => return Err(NodeError::Cancelled),
                Err(err) => {
                    ctx.logger.warn(format!(
                        "probe {}:{} failed (attempt {attempt}/{MONITOR_ATTEMPTS}): {err}",
                        target.host, target.port
                    ));
                    last_error = Some(err);
                    if attempt < MONITOR_ATTEMPTS {
                        ctx.sleep(self.services.monitor_retry_delay).await?;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| NodeError::failed("certificate probe failed")))
    }
}
