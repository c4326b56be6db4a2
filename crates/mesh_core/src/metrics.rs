//! Extração genérica de métricas.
//!
//! Cada grupo de métricas expõe uma tabela estática
//! `(nome canônico do campo, valor)`. O extrator percorre a tabela e
//! decide apenas pelo *tipo* do valor, nunca pelo nome do campo:
//!
//! | Tipo              | Resultado                 |
//! |-------------------|---------------------------|
//! | float             | copiado                   |
//! | inteiro c/ sinal  | convertido para `f64`     |
//! | inteiro s/ sinal  | convertido para `f64`     |
//! | bool              | `1.0` / `0.0`             |
//! | string/mensagem/lista | ignorado              |
//!
//! Presença segue a semântica proto3: campos `optional` estão presentes
//! quando `Some`; campos escalares implícitos quando diferentes de zero.

use crate::types::Telemetry;
use crate::wire;
use chrono::{DateTime, Utc};

/// Valor de um campo presente, classificado por tipo.
///
/// `Bool`, `Message` e `List` não aparecem nas tabelas atuais; ficam para
/// completar a regra de tipos acima.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Float(f64),
    Signed(i64),
    Unsigned(u64),
    Bool(bool),
    Text(&'a str),
    Message,
    List,
}

impl FieldValue<'_> {
    /// Valor numérico de um campo escalar; `None` para texto/mensagem/lista.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            FieldValue::Float(v) => Some(v),
            FieldValue::Signed(v) => Some(v as f64),
            FieldValue::Unsigned(v) => Some(v as f64),
            FieldValue::Bool(v) => Some(if v { 1.0 } else { 0.0 }),
            FieldValue::Text(_) | FieldValue::Message | FieldValue::List => None,
        }
    }
}

/// Entrada da tabela: nome canônico + valor, `None` quando ausente.
pub type MetricField<'a> = (&'static str, Option<FieldValue<'a>>);

/// Um sub-mensagem que agrupa leituras escalares.
pub trait MetricGroup {
    /// Tabela de todos os campos do grupo, na ordem de declaração.
    fn fields(&self) -> Vec<MetricField<'_>>;
}

// ── Helpers de presença ──

fn opt_f32(v: Option<f32>) -> Option<FieldValue<'static>> {
    v.map(|x| FieldValue::Float(f64::from(x)))
}

fn opt_u32(v: Option<u32>) -> Option<FieldValue<'static>> {
    v.map(|x| FieldValue::Unsigned(u64::from(x)))
}

fn opt_u64(v: Option<u64>) -> Option<FieldValue<'static>> {
    v.map(FieldValue::Unsigned)
}

fn implicit_f32(v: f32) -> Option<FieldValue<'static>> {
    (v != 0.0).then(|| FieldValue::Float(f64::from(v)))
}

fn implicit_u32(v: u32) -> Option<FieldValue<'static>> {
    (v != 0).then(|| FieldValue::Unsigned(u64::from(v)))
}

fn implicit_u64(v: u64) -> Option<FieldValue<'static>> {
    (v != 0).then_some(FieldValue::Unsigned(v))
}

fn implicit_i32(v: i32) -> Option<FieldValue<'static>> {
    (v != 0).then(|| FieldValue::Signed(i64::from(v)))
}

// ──────────────────────────────────────────────
// Tabelas por grupo
// ──────────────────────────────────────────────

impl MetricGroup for wire::DeviceMetrics {
    fn fields(&self) -> Vec<MetricField<'_>> {
        vec![
            ("battery_level", opt_u32(self.battery_level)),
            ("voltage", opt_f32(self.voltage)),
            ("channel_utilization", opt_f32(self.channel_utilization)),
            ("air_util_tx", opt_f32(self.air_util_tx)),
            ("uptime_seconds", opt_u32(self.uptime_seconds)),
        ]
    }
}

impl MetricGroup for wire::EnvironmentMetrics {
    fn fields(&self) -> Vec<MetricField<'_>> {
        vec![
            ("temperature", opt_f32(self.temperature)),
            ("relative_humidity", opt_f32(self.relative_humidity)),
            ("barometric_pressure", opt_f32(self.barometric_pressure)),
            ("gas_resistance", opt_f32(self.gas_resistance)),
            ("voltage", opt_f32(self.voltage)),
            ("current", opt_f32(self.current)),
            ("iaq", opt_u32(self.iaq)),
            ("distance", opt_f32(self.distance)),
            ("lux", opt_f32(self.lux)),
            ("white_lux", opt_f32(self.white_lux)),
            ("ir_lux", opt_f32(self.ir_lux)),
            ("uv_lux", opt_f32(self.uv_lux)),
            ("wind_direction", opt_u32(self.wind_direction)),
            ("wind_speed", opt_f32(self.wind_speed)),
            ("weight", opt_f32(self.weight)),
            ("wind_gust", opt_f32(self.wind_gust)),
            ("wind_lull", opt_f32(self.wind_lull)),
        ]
    }
}

impl MetricGroup for wire::AirQualityMetrics {
    fn fields(&self) -> Vec<MetricField<'_>> {
        vec![
            ("pm10_standard", opt_u32(self.pm10_standard)),
            ("pm25_standard", opt_u32(self.pm25_standard)),
            ("pm100_standard", opt_u32(self.pm100_standard)),
            ("pm10_environmental", opt_u32(self.pm10_environmental)),
            ("pm25_environmental", opt_u32(self.pm25_environmental)),
            ("pm100_environmental", opt_u32(self.pm100_environmental)),
            ("particles_03um", opt_u32(self.particles_03um)),
            ("particles_05um", opt_u32(self.particles_05um)),
            ("particles_10um", opt_u32(self.particles_10um)),
            ("particles_25um", opt_u32(self.particles_25um)),
            ("particles_50um", opt_u32(self.particles_50um)),
            ("particles_100um", opt_u32(self.particles_100um)),
            ("co2", opt_u32(self.co2)),
        ]
    }
}

impl MetricGroup for wire::PowerMetrics {
    fn fields(&self) -> Vec<MetricField<'_>> {
        vec![
            ("ch1_voltage", opt_f32(self.ch1_voltage)),
            ("ch1_current", opt_f32(self.ch1_current)),
            ("ch2_voltage", opt_f32(self.ch2_voltage)),
            ("ch2_current", opt_f32(self.ch2_current)),
            ("ch3_voltage", opt_f32(self.ch3_voltage)),
            ("ch3_current", opt_f32(self.ch3_current)),
        ]
    }
}

impl MetricGroup for wire::LocalStats {
    fn fields(&self) -> Vec<MetricField<'_>> {
        vec![
            ("uptime_seconds", implicit_u32(self.uptime_seconds)),
            ("channel_utilization", implicit_f32(self.channel_utilization)),
            ("air_util_tx", implicit_f32(self.air_util_tx)),
            ("num_packets_tx", implicit_u32(self.num_packets_tx)),
            ("num_packets_rx", implicit_u32(self.num_packets_rx)),
            ("num_packets_rx_bad", implicit_u32(self.num_packets_rx_bad)),
            ("num_online_nodes", implicit_u32(self.num_online_nodes)),
            ("num_total_nodes", implicit_u32(self.num_total_nodes)),
            ("num_rx_dupe", implicit_u32(self.num_rx_dupe)),
            ("num_tx_relay", implicit_u32(self.num_tx_relay)),
            ("num_tx_relay_canceled", implicit_u32(self.num_tx_relay_canceled)),
            ("heap_total_bytes", implicit_i32(self.heap_total_bytes)),
            ("heap_free_bytes", implicit_i32(self.heap_free_bytes)),
        ]
    }
}

impl MetricGroup for wire::HealthMetrics {
    fn fields(&self) -> Vec<MetricField<'_>> {
        vec![
            ("heart_bpm", opt_u32(self.heart_bpm)),
            // Nome do campo no esquema é "spO2"
            ("spO2", opt_u32(self.sp_o2)),
            ("temperature", opt_f32(self.temperature)),
        ]
    }
}

impl MetricGroup for wire::HostMetrics {
    fn fields(&self) -> Vec<MetricField<'_>> {
        vec![
            ("uptime_seconds", implicit_u64(self.uptime_seconds)),
            ("freemem_bytes", implicit_u64(self.freemem_bytes)),
            ("diskfree1_bytes", implicit_u64(self.diskfree1_bytes)),
            ("diskfree2_bytes", opt_u64(self.diskfree2_bytes)),
            ("diskfree3_bytes", opt_u64(self.diskfree3_bytes)),
            ("load1", implicit_u64(self.load1)),
            ("load5", implicit_u64(self.load5)),
            ("load15", implicit_u64(self.load15)),
            ("user_string", self.user_string.as_deref().map(FieldValue::Text)),
        ]
    }
}

// ──────────────────────────────────────────────
// Extração
// ──────────────────────────────────────────────

/// Uma medição por campo escalar presente do grupo.
pub fn extract<G: MetricGroup>(group: &G, node_id: &str, ts: DateTime<Utc>) -> Vec<Telemetry> {
    group
        .fields()
        .into_iter()
        .filter_map(|(name, value)| {
            let value = value?.as_f64()?;
            Some(Telemetry::new(node_id, name, value, ts))
        })
        .collect()
}

/// Converte uma mensagem `Telemetry` em medições.
///
/// Usa o `time` embutido quando diferente de zero, senão `now`. Os grupos
/// são visitados em ordem fixa e contribuem de forma independente.
pub fn telemetry_from_proto(
    node_id: &str,
    msg: &wire::Telemetry,
    now: DateTime<Utc>,
) -> Vec<Telemetry> {
    let ts = unix_or(msg.time, now);
    let mut out = Vec::new();

    if let Some(g) = msg.device_metrics() {
        out.extend(extract(g, node_id, ts));
    }
    if let Some(g) = msg.environment_metrics() {
        out.extend(extract(g, node_id, ts));
    }
    if let Some(g) = msg.air_quality_metrics() {
        out.extend(extract(g, node_id, ts));
    }
    if let Some(g) = msg.power_metrics() {
        out.extend(extract(g, node_id, ts));
    }
    if let Some(g) = msg.local_stats() {
        out.extend(extract(g, node_id, ts));
    }
    if let Some(g) = msg.health_metrics() {
        out.extend(extract(g, node_id, ts));
    }
    if let Some(g) = msg.host_metrics() {
        out.extend(extract(g, node_id, ts));
    }

    out
}

/// Segundos Unix não nulos viram instante; zero (ou fora de faixa) vira `fallback`.
pub(crate) fn unix_or(secs: impl Into<i64>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let secs: i64 = secs.into();
    match secs {
        0 => fallback,
        s => DateTime::from_timestamp(s, 0).unwrap_or(fallback),
    }
}

impl wire::Telemetry {
    pub fn device_metrics(&self) -> Option<&wire::DeviceMetrics> {
        match &self.variant {
            Some(wire::telemetry::Variant::DeviceMetrics(g)) => Some(g),
            _ => None,
        }
    }

    pub fn environment_metrics(&self) -> Option<&wire::EnvironmentMetrics> {
        match &self.variant {
            Some(wire::telemetry::Variant::EnvironmentMetrics(g)) => Some(g),
            _ => None,
        }
    }

    pub fn air_quality_metrics(&self) -> Option<&wire::AirQualityMetrics> {
        match &self.variant {
            Some(wire::telemetry::Variant::AirQualityMetrics(g)) => Some(g),
            _ => None,
        }
    }

    pub fn power_metrics(&self) -> Option<&wire::PowerMetrics> {
        match &self.variant {
            Some(wire::telemetry::Variant::PowerMetrics(g)) => Some(g),
            _ => None,
        }
    }

    pub fn local_stats(&self) -> Option<&wire::LocalStats> {
        match &self.variant {
            Some(wire::telemetry::Variant::LocalStats(g)) => Some(g),
            _ => None,
        }
    }

    pub fn health_metrics(&self) -> Option<&wire::HealthMetrics> {
        match &self.variant {
            Some(wire::telemetry::Variant::HealthMetrics(g)) => Some(g),
            _ => None,
        }
    }

    pub fn host_metrics(&self) -> Option<&wire::HostMetrics> {
        match &self.variant {
            Some(wire::telemetry::Variant::HostMetrics(g)) => Some(g),
            _ => None,
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
