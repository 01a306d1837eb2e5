mod stats;

pub use stats::RecordStatsQuery;
