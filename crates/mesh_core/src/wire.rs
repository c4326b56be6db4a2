//! Esquema protobuf da malha.
//!
//! Subconjunto das mensagens públicas do firmware, declarado à mão com
//! `prost` e com as mesmas tags do esquema público, para decodificar
//! envelopes MQTT sem etapa de build:
//!
//! ```text
//! ServiceEnvelope
//! └── MeshPacket (from, …)
//!     └── Data (portnum, payload)
//!         ├── TELEMETRY_APP → Telemetry (time + 1 de 7 grupos de métricas)
//!         ├── NODEINFO_APP  → NodeInfo (num, User)
//!         └── POSITION_APP  → Position (latitude_i, longitude_i, …)
//! MapReport (publicado sem envelope)
//! ```

// ──────────────────────────────────────────────
// Envelope e pacote
// ──────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServiceEnvelope {
    #[prost(message, optional, tag = "1")]
    pub packet: Option<MeshPacket>,
    #[prost(string, tag = "2")]
    pub channel_id: String,
    #[prost(string, tag = "3")]
    pub gateway_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MeshPacket {
    #[prost(fixed32, tag = "1")]
    pub from: u32,
    #[prost(fixed32, tag = "2")]
    pub to: u32,
    #[prost(uint32, tag = "3")]
    pub channel: u32,
    #[prost(fixed32, tag = "6")]
    pub id: u32,
    #[prost(fixed32, tag = "7")]
    pub rx_time: u32,
    #[prost(float, tag = "8")]
    pub rx_snr: f32,
    #[prost(uint32, tag = "9")]
    pub hop_limit: u32,
    #[prost(bool, tag = "10")]
    pub want_ack: bool,
    #[prost(int32, tag = "12")]
    pub rx_rssi: i32,
    #[prost(oneof = "mesh_packet::PayloadVariant", tags = "4, 5")]
    pub payload_variant: Option<mesh_packet::PayloadVariant>,
}

pub mod mesh_packet {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "4")]
        Decoded(super::Data),
        #[prost(bytes, tag = "5")]
        Encrypted(Vec<u8>),
    }
}

impl MeshPacket {
    /// Bloco de dados já decifrado, se houver.
    pub fn decoded(&self) -> Option<&Data> {
        match &self.payload_variant {
            Some(mesh_packet::PayloadVariant::Decoded(data)) => Some(data),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Data {
    #[prost(enumeration = "PortNum", tag = "1")]
    pub portnum: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub want_response: bool,
    #[prost(fixed32, tag = "4")]
    pub dest: u32,
    #[prost(fixed32, tag = "5")]
    pub source: u32,
    #[prost(fixed32, tag = "6")]
    pub request_id: u32,
    #[prost(fixed32, tag = "7")]
    pub reply_id: u32,
}

impl Data {
    /// Porta de aplicação; valores desconhecidos viram `UnknownApp`.
    pub fn port(&self) -> PortNum {
        PortNum::try_from(self.portnum).unwrap_or(PortNum::UnknownApp)
    }
}

/// Porta de aplicação que identifica o esquema de `Data::payload`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PortNum {
    UnknownApp = 0,
    TextMessageApp = 1,
    RemoteHardwareApp = 2,
    PositionApp = 3,
    NodeinfoApp = 4,
    RoutingApp = 5,
    AdminApp = 6,
    TextMessageCompressedApp = 7,
    WaypointApp = 8,
    TelemetryApp = 67,
    MapReportApp = 73,
}

// ──────────────────────────────────────────────
// Telemetria
// ──────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Telemetry {
    /// Segundos Unix embutidos pelo nó (0 = ausente)
    #[prost(fixed32, tag = "1")]
    pub time: u32,
    #[prost(oneof = "telemetry::Variant", tags = "2, 3, 4, 5, 6, 7, 8")]
    pub variant: Option<telemetry::Variant>,
}

pub mod telemetry {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Variant {
        #[prost(message, tag = "2")]
        DeviceMetrics(super::DeviceMetrics),
        #[prost(message, tag = "3")]
        EnvironmentMetrics(super::EnvironmentMetrics),
        #[prost(message, tag = "4")]
        AirQualityMetrics(super::AirQualityMetrics),
        #[prost(message, tag = "5")]
        PowerMetrics(super::PowerMetrics),
        #[prost(message, tag = "6")]
        LocalStats(super::LocalStats),
        #[prost(message, tag = "7")]
        HealthMetrics(super::HealthMetrics),
        #[prost(message, tag = "8")]
        HostMetrics(super::HostMetrics),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceMetrics {
    #[prost(uint32, optional, tag = "1")]
    pub battery_level: Option<u32>,
    #[prost(float, optional, tag = "2")]
    pub voltage: Option<f32>,
    #[prost(float, optional, tag = "3")]
    pub channel_utilization: Option<f32>,
    #[prost(float, optional, tag = "4")]
    pub air_util_tx: Option<f32>,
    #[prost(uint32, optional, tag = "5")]
    pub uptime_seconds: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EnvironmentMetrics {
    #[prost(float, optional, tag = "1")]
    pub temperature: Option<f32>,
    #[prost(float, optional, tag = "2")]
    pub relative_humidity: Option<f32>,
    #[prost(float, optional, tag = "3")]
    pub barometric_pressure: Option<f32>,
    #[prost(float, optional, tag = "4")]
    pub gas_resistance: Option<f32>,
    #[prost(float, optional, tag = "5")]
    pub voltage: Option<f32>,
    #[prost(float, optional, tag = "6")]
    pub current: Option<f32>,
    #[prost(uint32, optional, tag = "7")]
    pub iaq: Option<u32>,
    #[prost(float, optional, tag = "8")]
    pub distance: Option<f32>,
    #[prost(float, optional, tag = "9")]
    pub lux: Option<f32>,
    #[prost(float, optional, tag = "10")]
    pub white_lux: Option<f32>,
    #[prost(float, optional, tag = "11")]
    pub ir_lux: Option<f32>,
    #[prost(float, optional, tag = "12")]
    pub uv_lux: Option<f32>,
    #[prost(uint32, optional, tag = "13")]
    pub wind_direction: Option<u32>,
    #[prost(float, optional, tag = "14")]
    pub wind_speed: Option<f32>,
    #[prost(float, optional, tag = "15")]
    pub weight: Option<f32>,
    #[prost(float, optional, tag = "16")]
    pub wind_gust: Option<f32>,
    #[prost(float, optional, tag = "17")]
    pub wind_lull: Option<f32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AirQualityMetrics {
    #[prost(uint32, optional, tag = "1")]
    pub pm10_standard: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub pm25_standard: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub pm100_standard: Option<u32>,
    #[prost(uint32, optional, tag = "4")]
    pub pm10_environmental: Option<u32>,
    #[prost(uint32, optional, tag = "5")]
    pub pm25_environmental: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    pub pm100_environmental: Option<u32>,
    #[prost(uint32, optional, tag = "7")]
    pub particles_03um: Option<u32>,
    #[prost(uint32, optional, tag = "8")]
    pub particles_05um: Option<u32>,
    #[prost(uint32, optional, tag = "9")]
    pub particles_10um: Option<u32>,
    #[prost(uint32, optional, tag = "10")]
    pub particles_25um: Option<u32>,
    #[prost(uint32, optional, tag = "11")]
    pub particles_50um: Option<u32>,
    #[prost(uint32, optional, tag = "12")]
    pub particles_100um: Option<u32>,
    #[prost(uint32, optional, tag = "13")]
    pub co2: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PowerMetrics {
    #[prost(float, optional, tag = "1")]
    pub ch1_voltage: Option<f32>,
    #[prost(float, optional, tag = "2")]
    pub ch1_current: Option<f32>,
    #[prost(float, optional, tag = "3")]
    pub ch2_voltage: Option<f32>,
    #[prost(float, optional, tag = "4")]
    pub ch2_current: Option<f32>,
    #[prost(float, optional, tag = "5")]
    pub ch3_voltage: Option<f32>,
    #[prost(float, optional, tag = "6")]
    pub ch3_current: Option<f32>,
}

/// Estatísticas locais do rádio. Campos sem `optional`: presença implícita.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LocalStats {
    #[prost(uint32, tag = "1")]
    pub uptime_seconds: u32,
    #[prost(float, tag = "2")]
    pub channel_utilization: f32,
    #[prost(float, tag = "3")]
    pub air_util_tx: f32,
    #[prost(uint32, tag = "4")]
    pub num_packets_tx: u32,
    #[prost(uint32, tag = "5")]
    pub num_packets_rx: u32,
    #[prost(uint32, tag = "6")]
    pub num_packets_rx_bad: u32,
    #[prost(uint32, tag = "7")]
    pub num_online_nodes: u32,
    #[prost(uint32, tag = "8")]
    pub num_total_nodes: u32,
    #[prost(uint32, tag = "9")]
    pub num_rx_dupe: u32,
    #[prost(uint32, tag = "10")]
    pub num_tx_relay: u32,
    #[prost(uint32, tag = "11")]
    pub num_tx_relay_canceled: u32,
    #[prost(int32, tag = "12")]
    pub heap_total_bytes: i32,
    #[prost(int32, tag = "13")]
    pub heap_free_bytes: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HealthMetrics {
    #[prost(uint32, optional, tag = "1")]
    pub heart_bpm: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub sp_o2: Option<u32>,
    #[prost(float, optional, tag = "3")]
    pub temperature: Option<f32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HostMetrics {
    #[prost(uint64, tag = "1")]
    pub uptime_seconds: u64,
    #[prost(uint64, tag = "2")]
    pub freemem_bytes: u64,
    #[prost(uint64, tag = "3")]
    pub diskfree1_bytes: u64,
    #[prost(uint64, optional, tag = "4")]
    pub diskfree2_bytes: Option<u64>,
    #[prost(uint64, optional, tag = "5")]
    pub diskfree3_bytes: Option<u64>,
    #[prost(uint64, tag = "6")]
    pub load1: u64,
    #[prost(uint64, tag = "7")]
    pub load5: u64,
    #[prost(uint64, tag = "8")]
    pub load15: u64,
    #[prost(string, optional, tag = "9")]
    pub user_string: Option<String>,
}

// ──────────────────────────────────────────────
// Posição e identidade
// ──────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Position {
    /// Graus × 1e7
    #[prost(sfixed32, optional, tag = "1")]
    pub latitude_i: Option<i32>,
    /// Graus × 1e7
    #[prost(sfixed32, optional, tag = "2")]
    pub longitude_i: Option<i32>,
    /// Metros acima do nível do mar
    #[prost(int32, optional, tag = "3")]
    pub altitude: Option<i32>,
    #[prost(fixed32, tag = "4")]
    pub time: u32,
    #[prost(int32, tag = "5")]
    pub location_source: i32,
    #[prost(int32, tag = "6")]
    pub altitude_source: i32,
    #[prost(fixed32, tag = "7")]
    pub timestamp: u32,
    #[prost(uint32, tag = "19")]
    pub sats_in_view: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct User {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub long_name: String,
    #[prost(string, tag = "3")]
    pub short_name: String,
    #[prost(int32, tag = "5")]
    pub hw_model: i32,
    #[prost(bool, tag = "6")]
    pub is_licensed: bool,
    #[prost(int32, tag = "7")]
    pub role: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeInfo {
    #[prost(uint32, tag = "1")]
    pub num: u32,
    #[prost(message, optional, tag = "2")]
    pub user: Option<User>,
    #[prost(message, optional, tag = "3")]
    pub position: Option<Position>,
    #[prost(float, tag = "4")]
    pub snr: f32,
    #[prost(fixed32, tag = "5")]
    pub last_heard: u32,
    #[prost(message, optional, tag = "6")]
    pub device_metrics: Option<DeviceMetrics>,
    #[prost(uint32, tag = "7")]
    pub channel: u32,
    #[prost(bool, tag = "8")]
    pub via_mqtt: bool,
}

/// Relatório de mapa: nomes e firmware anunciados por um nó, sem envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MapReport {
    #[prost(string, tag = "1")]
    pub long_name: String,
    #[prost(string, tag = "2")]
    pub short_name: String,
    #[prost(int32, tag = "3")]
    pub role: i32,
    #[prost(int32, tag = "4")]
    pub hw_model: i32,
    #[prost(string, tag = "5")]
    pub firmware_version: String,
    #[prost(int32, tag = "6")]
    pub region: i32,
    #[prost(int32, tag = "7")]
    pub modem_preset: i32,
    #[prost(bool, tag = "8")]
    pub has_default_channel: bool,
    #[prost(sfixed32, tag = "9")]
    pub latitude_i: i32,
    #[prost(sfixed32, tag = "10")]
    pub longitude_i: i32,
    #[prost(int32, tag = "11")]
    pub altitude: i32,
    #[prost(uint32, tag = "12")]
    pub position_precision: u32,
    #[prost(uint32, tag = "13")]
    pub num_online_local_nodes: u32,
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn unknown_port_number_maps_to_unknown_app() {
        let data = Data {
            portnum: 999,
            ..Default::default()
        };
        assert_eq!(data.port(), PortNum::UnknownApp);
    }

    #[test]
    fn envelope_exposes_decoded_block() {
        let pkt = MeshPacket {
            from: 7,
            payload_variant: Some(mesh_packet::PayloadVariant::Decoded(Data {
                portnum: PortNum::TelemetryApp as i32,
                ..Default::default()
            })),
            ..Default::default()
        };
        let env = ServiceEnvelope {
            packet: Some(pkt),
            ..Default::default()
        };
        let bytes = env.encode_to_vec();
        let back = ServiceEnvelope::decode(bytes.as_slice()).unwrap();
        let data = back.packet.as_ref().and_then(MeshPacket::decoded).unwrap();
        assert_eq!(data.port(), PortNum::TelemetryApp);
    }

    #[test]
    fn encrypted_packet_has_no_decoded_block() {
        let pkt = MeshPacket {
            payload_variant: Some(mesh_packet::PayloadVariant::Encrypted(vec![1, 2, 3])),
            ..Default::default()
        };
        assert!(pkt.decoded().is_none());
    }
}
