use crate::core::error::WfError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::duration::parse_duration;
use crate::core::workflow::schema::Workflow;
use crate::core::workflow::steps::StepAction;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_INTERVAL: &str = "5s";

/// WaitForInstancesSignal step: block until each listed instance either
/// stops or emits a matching line on its serial port.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaitForInstancesSignal(pub Vec<InstanceSignal>);

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSignal {
    /// Workflow-local instance name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Polling interval, e.g. `1s`; defaults to 5s.
    #[serde(rename = "Interval", default, skip_serializing_if = "String::is_empty")]
    pub interval: String,
    #[serde(rename = "Stopped", default, skip_serializing_if = "super::is_false")]
    pub stopped: bool,
    #[serde(rename = "SerialOutput", default, skip_serializing_if = "Option::is_none")]
    pub serial_output: Option<SerialOutputSpec>,
    #[serde(skip)]
    pub(crate) parsed_interval: Duration,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerialOutputSpec {
    #[serde(rename = "Port")]
    pub port: i64,
    #[serde(rename = "SuccessMatch", default, skip_serializing_if = "String::is_empty")]
    pub success_match: String,
    #[serde(rename = "FailureMatch", default, skip_serializing_if = "String::is_empty")]
    pub failure_match: String,
}

#[async_trait]
impl StepAction for WaitForInstancesSignal {
    async fn populate(&mut self, _step_name: &str, _w: &Workflow) -> Result<(), WfError> {
        for signal in &mut self.0 {
            if signal.interval.is_empty() {
                signal.interval = DEFAULT_INTERVAL.to_string();
            }
            signal.parsed_interval = parse_duration(&signal.interval)?;
        }
        Ok(())
    }

    fn validate(&mut self, step_name: &str, w: &Workflow) -> Result<(), WfError> {
        for signal in &self.0 {
            if !w.registry.instances.contains(&signal.name) {
                return Err(WfError::validation(format!(
                    "step \"{}\": cannot wait for signal from instance \"{}\", not found in workflow",
                    step_name, signal.name
                )));
            }
            match &signal.serial_output {
                None if !signal.stopped => {
                    return Err(WfError::validation(format!(
                        "step \"{}\": signal for instance \"{}\" must define Stopped or SerialOutput",
                        step_name, signal.name
                    )));
                }
                Some(serial) => {
                    if serial.port < 1 {
                        return Err(WfError::validation(format!(
                            "step \"{}\": signal for instance \"{}\" has invalid serial port {}",
                            step_name, signal.name, serial.port
                        )));
                    }
                    if serial.success_match.is_empty() && serial.failure_match.is_empty() {
                        return Err(WfError::validation(format!(
                            "step \"{}\": signal for instance \"{}\" must define SuccessMatch or FailureMatch",
                            step_name, signal.name
                        )));
                    }
                }
                None => {}
            }
        }
        Ok(())
    }

    async fn run(&self, _step_name: &str, w: &Workflow) -> Result<(), WfError> {
        try_join_all(self.0.iter().map(|signal| wait_for_signal(w, signal))).await?;
        Ok(())
    }
}

async fn wait_for_signal(w: &Workflow, signal: &InstanceSignal) -> Result<(), WfError> {
    let client = w.compute_client()?;
    let entry = w.registry.instances.entry(&signal.name);
    let real = entry
        .as_ref()
        .map(|e| e.real_name.clone())
        .unwrap_or_else(|| signal.name.clone());
    let zone = entry
        .as_ref()
        .map(|e| e.zone.clone())
        .unwrap_or_else(|| w.zone.clone());
    w.log(&format!(
        "WaitForInstancesSignal: waiting for instance \"{}\"",
        real
    ))
    .await;

    let mut offset = 0i64;
    loop {
        let cancel_token = w.cancel_token();
        tokio::select! {
            _ = cancel_token.cancelled() => {
                return Err(WfError::canceled("step canceled"));
            }
            _ = tokio::time::sleep(signal.parsed_interval) => {}
        }

        if let Some(serial) = &signal.serial_output {
            match client
                .serial_port_output(&w.project, &zone, &real, serial.port, offset)
                .await
            {
                Ok(chunk) => {
                    offset = chunk.next;
                    if !serial.failure_match.is_empty()
                        && chunk.contents.contains(&serial.failure_match)
                    {
                        return Err(WfError::new(
                            ErrorCategory::RunError,
                            format!(
                                "failure match \"{}\" found in serial output of instance \"{}\"",
                                serial.failure_match, real
                            ),
                        ));
                    }
                    if !serial.success_match.is_empty()
                        && chunk.contents.contains(&serial.success_match)
                    {
                        w.log(&format!(
                            "WaitForInstancesSignal: success match found for instance \"{}\"",
                            real
                        ))
                        .await;
                        return Ok(());
                    }
                }
                // The instance may not be up yet; keep polling.
                Err(err) => {
                    tracing::debug!(instance = %real, error = %err, "serial output not available");
                }
            }
        }

        if signal.stopped && client.instance_stopped(&w.project, &zone, &real).await? {
            w.log(&format!(
                "WaitForInstancesSignal: instance \"{}\" stopped",
                real
            ))
            .await;
            return Ok(());
        }
    }
}
