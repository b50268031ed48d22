//! Lightweight counters surfaced by `GET /api/bot/status`.

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct EngineStats {
    pub ticks: u64,
    pub failed_ticks: u64,
}
