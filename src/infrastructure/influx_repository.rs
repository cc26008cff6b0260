// InfluxDB repository implementation
use crate::application::shot_repository::ShotRepository;
use crate::domain::parameters::ParameterId;
use crate::domain::protocol::Phase;
use crate::domain::shot::CompletedShot;
use crate::domain::trajectory::TrajectorySample;
use crate::infrastructure::config::InfluxSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt::Write;

const META_MEASUREMENT: &str = "shot_meta";
const SAMPLE_MEASUREMENT: &str = "shot_sample";
const EVENT_MEASUREMENT: &str = "shot_event";
const PARAMETER_MEASUREMENT: &str = "alarm_parameters";

#[derive(Debug, Clone)]
pub struct InfluxRepository {
    host: String,
    token: String,
    database: String,
    retention_policy: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResponse {
    results: Vec<InfluxQLResult>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResult {
    #[serde(default)]
    series: Option<Vec<InfluxQLSeries>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLSeries {
    columns: Vec<String>,
    values: Vec<Vec<serde_json::Value>>,
}

fn micros(t: DateTime<Utc>) -> i64 {
    t.timestamp_micros()
}

/// Tag values escape commas, spaces and equals signs.
fn escape_tag(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace(' ', "\\ ")
        .replace('=', "\\=")
}

fn escape_string_field(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Line protocol for one shot, microsecond precision. Non-finite values
/// are left out since the format cannot carry them.
pub fn shot_lines(shot: &CompletedShot) -> String {
    let meta = &shot.meta;
    let t0 = micros(meta.t0);
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{META_MEASUREMENT} shot={}i,num_p={}i,num_t={}i,param_bytes={}i,t1={}i {t0}",
        meta.shot,
        meta.num_p,
        meta.num_t,
        meta.param_bytes,
        micros(meta.t1),
    );

    let phases = [
        (Phase::Position, &shot.trajectory.position),
        (Phase::Time, &shot.trajectory.time),
    ];
    for (phase, samples) in phases {
        for (idx, s) in samples.iter().enumerate() {
            let fields = sample_fields(s);
            if fields.is_empty() {
                continue;
            }
            // one microsecond per sample keeps points of a phase distinct
            let _ = writeln!(
                out,
                "{SAMPLE_MEASUREMENT},phase={} shot={}i,idx={}i,{fields} {}",
                phase.tag(),
                meta.shot,
                idx,
                t0 + idx as i64,
            );
        }
    }

    for (n, e) in shot.events.iter().enumerate() {
        let kind = serde_json::to_value(&e.event)
            .ok()
            .and_then(|v| v.get("kind").and_then(|k| k.as_str()).map(str::to_string))
            .unwrap_or_else(|| "other".to_string());
        let text = serde_json::to_string(&e.event).unwrap_or_default();
        let _ = writeln!(
            out,
            "{EVENT_MEASUREMENT},kind={} shot={}i,event=\"{}\" {}",
            escape_tag(&kind),
            e.shot,
            escape_string_field(&text),
            micros(e.t) + n as i64,
        );
    }

    let fields: Vec<String> = ParameterId::ALL
        .into_iter()
        .filter_map(|id| {
            let v = shot.parameters.get(id);
            v.is_finite().then(|| format!("{}={}", id.name(), v))
        })
        .collect();
    let _ = writeln!(
        out,
        "{PARAMETER_MEASUREMENT} shot={}i{}{} {t0}",
        meta.shot,
        if fields.is_empty() { "" } else { "," },
        fields.join(","),
    );

    out
}

fn sample_fields(s: &TrajectorySample) -> String {
    [
        ("t", s.t),
        ("pos", s.pos),
        ("vel", s.vel),
        ("press_head", s.press_head),
        ("press_rod", s.press_rod),
    ]
    .into_iter()
    .filter(|(_, v)| v.is_finite())
    .map(|(k, v)| format!("{k}={v}"))
    .collect::<Vec<_>>()
    .join(",")
}

impl InfluxRepository {
    pub fn new(settings: InfluxSettings) -> Self {
        Self {
            host: settings.host.trim_end_matches('/').to_string(),
            token: settings.token,
            database: settings.database,
            retention_policy: settings.retention_policy,
            client: reqwest::Client::new(),
        }
    }

    fn build_query_url(&self, query: &str) -> String {
        let encoded_query = urlencoding::encode(query);
        format!(
            "{}/query?db={}&rp={}&q={}",
            self.host, self.database, self.retention_policy, encoded_query
        )
    }

    fn build_write_url(&self) -> String {
        format!(
            "{}/write?db={}&rp={}&precision=u",
            self.host,
            urlencoding::encode(&self.database),
            urlencoding::encode(&self.retention_policy)
        )
    }

    async fn execute_query(&self, query: &str) -> Result<InfluxQLResponse> {
        let url = self.build_query_url(query);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB query failed with status {}: {}", status, body);
        }

        let data = response
            .json::<InfluxQLResponse>()
            .await
            .context("Failed to parse InfluxDB response")?;

        if let Some(result) = data.results.first() {
            if let Some(error) = &result.error {
                anyhow::bail!("InfluxDB query error: {}", error);
            }
        }

        Ok(data)
    }

    async fn execute_write(&self, body: String) -> Result<()> {
        let response = self
            .client
            .post(self.build_write_url())
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .context("Failed to send write to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB write failed with status {}: {}", status, body);
        }

        Ok(())
    }
}

fn last_value(response: &InfluxQLResponse) -> Option<f64> {
    let series = response.results.first()?.series.as_ref()?.first()?;
    let row = series.values.first()?;
    let idx = series.columns.iter().position(|c| c == "last").unwrap_or(1);
    row.get(idx)?.as_f64()
}

#[async_trait]
impl ShotRepository for InfluxRepository {
    async fn last_shot_number(&self) -> Result<Option<u32>> {
        let query = format!("SELECT last(\"shot\") FROM \"{META_MEASUREMENT}\"");
        tracing::debug!("Executing last shot query: {}", query);
        let response = self.execute_query(&query).await?;
        Ok(last_value(&response).map(|v| v as u32))
    }

    async fn save_shot(&self, shot: &CompletedShot) -> Result<()> {
        let body = shot_lines(shot);
        self.execute_write(body)
            .await
            .with_context(|| format!("Failed to persist shot {}", shot.meta.shot))?;
        tracing::debug!(shot = shot.meta.shot, "shot persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::board_event::BoardEvent;
    use crate::domain::parameters::AlarmParameters;
    use crate::domain::shot::{ShotEvent, ShotMeta};
    use crate::domain::trajectory::Trajectory;

    fn shot() -> CompletedShot {
        let t0 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut values = [1.5; 10];
        values[5] = f64::NAN;
        CompletedShot {
            meta: ShotMeta {
                shot: 12,
                t0,
                t1: t0,
                num_p: 1,
                num_t: 1,
                param_bytes: 40,
            },
            trajectory: Trajectory::new(
                12,
                vec![TrajectorySample::new(0.0, 1.0, 2.0, 3.0, 4.0)],
                vec![TrajectorySample::new(0.0, 1.0, 0.0, 3.0, 4.0)],
            ),
            events: vec![ShotEvent {
                shot: 12,
                t: t0,
                event: BoardEvent::FatalOrWarning {
                    fatal: false,
                    text: "low oil".to_string(),
                },
            }],
            parameters: AlarmParameters::from_values(12, values),
        }
    }

    #[test]
    fn test_shot_lines() {
        let body = shot_lines(&shot());
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(
            lines[0],
            "shot_meta shot=12i,num_p=1i,num_t=1i,param_bytes=40i,t1=1700000000000000i 1700000000000000"
        );
        assert!(lines[1].starts_with("shot_sample,phase=P shot=12i,idx=0i,t=0,pos=1,vel=2"));
        assert!(lines[2].starts_with("shot_sample,phase=T "));
        assert!(lines[3].starts_with("shot_event,kind=fatal_or_warning shot=12i,event=\"{\\\"kind\\\""));
        assert!(lines[4].starts_with("alarm_parameters shot=12i,fill_time=1.5"));
        assert!(!lines[4].contains("intens_rise_time"));
    }

    #[test]
    fn test_tag_escaping() {
        assert_eq!(escape_tag("a b,c=d"), "a\\ b\\,c\\=d");
    }

    #[test]
    fn test_last_value_parsing() {
        let response: InfluxQLResponse = serde_json::from_str(
            r#"{"results":[{"series":[{"name":"shot_meta","columns":["time","last"],"values":[["2024-01-01T00:00:00Z",57]]}]}]}"#,
        )
        .unwrap();
        assert_eq!(last_value(&response), Some(57.0));

        let empty: InfluxQLResponse = serde_json::from_str(r#"{"results":[{}]}"#).unwrap();
        assert_eq!(last_value(&empty), None);
    }

    #[test]
    fn test_write_url() {
        let repo = InfluxRepository::new(InfluxSettings {
            host: "http://influx:8086/".to_string(),
            token: "t".to_string(),
            database: "ft3".to_string(),
            retention_policy: "autogen".to_string(),
        });
        assert_eq!(
            repo.build_write_url(),
            "http://influx:8086/write?db=ft3&rp=autogen&precision=u"
        );
    }
}
