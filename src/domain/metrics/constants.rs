//! Constants for metric extraction, aggregation and statistical analysis

/// Names of the metrics derived from usage events
pub mod metric_names {
    pub const CONVERSATIONS_CREATED: &str = "conversations.created";
    pub const MESSAGES_SENT: &str = "messages.sent";
    pub const MESSAGE_LENGTH: &str = "messages.length";
    pub const TOKENS: &str = "tokens";
    pub const PROMPT_TOKENS: &str = "tokens.prompt";
    pub const COMPLETION_TOKENS: &str = "tokens.completion";
    pub const TOKEN_COST: &str = "tokens.cost";
    pub const USER_ACTIVITY: &str = "users.activity";
    pub const USER_ENGAGEMENT: &str = "users.engagement";
}

/// Tag keys attached to derived points
pub mod tag_keys {
    pub const ROLE: &str = "role";
    pub const MODEL: &str = "model";
    pub const ACTION: &str = "action";
}

/// Bucket widths in seconds
pub mod intervals {
    pub const ONE_MINUTE_SECS: i64 = 60;
    pub const FIVE_MINUTES_SECS: i64 = 5 * ONE_MINUTE_SECS;
    pub const ONE_HOUR_SECS: i64 = 60 * ONE_MINUTE_SECS;
    pub const ONE_DAY_SECS: i64 = 24 * ONE_HOUR_SECS;
}

/// Thresholds used by the statistical analyzer
pub mod statistical {
    /// Minimum number of samples for a least-squares trend
    pub const MIN_TREND_POINTS: usize = 3;

    /// Slope above which a trend is increasing (and below the negation, decreasing)
    pub const TREND_SLOPE_THRESHOLD: f64 = 0.01;

    /// Largest autocorrelation lag inspected for seasonality
    pub const MAX_SEASONALITY_LAG: usize = 50;

    /// Lags are limited to this fraction of the series length (n / 4)
    pub const SEASONALITY_LAG_DIVISOR: usize = 4;

    /// Autocorrelation a lag must exceed to count as a seasonal period
    pub const SEASONALITY_THRESHOLD: f64 = 0.5;

    /// Z-score above which a sample is a medium severity anomaly
    pub const MEDIUM_ANOMALY_SIGMA: f64 = 2.0;

    /// Z-score above which a sample is a high severity anomaly
    pub const HIGH_ANOMALY_SIGMA: f64 = 3.0;

    /// Interquartile range multiplier for summary outliers
    pub const IQR_OUTLIER_FACTOR: f64 = 1.5;

    /// Percentiles reported by the summary
    pub const SUMMARY_PERCENTILES: [f64; 6] = [25.0, 50.0, 75.0, 90.0, 95.0, 99.0];
}

/// Retention policy constants
pub mod retention {
    /// Aggregated buckets outlive raw points by this factor
    pub const DEFAULT_BUCKET_RETENTION_MULTIPLIER: u32 = 7;

    /// Default raw retention in days
    pub const DEFAULT_RETENTION_DAYS: u32 = 30;
}
