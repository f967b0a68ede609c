use std::{path::PathBuf, time::Duration};

/// The configuration for a WebSocket session.
///
/// # Example
/// ```
/// # use std::time::Duration;
/// # use websock_engine::session::SessionConfig;
/// let conf = SessionConfig::default()
///     .ping_interval(Some(Duration::from_secs(15)))
///     .max_queue_depth(128);
/// # assert_eq!(conf.queue_low_water, 64);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long the worker waits for outbound or inbound work before running an
    /// idle tick. The default value is 250 milliseconds.
    pub tick_interval: Duration,
    /// Granularity of the readability wait inside one tick: a newly queued
    /// outbound frame waits at most this long before the worker notices it.
    /// An idle session wakes once per slice to look at the queue, so larger
    /// values trade send latency for fewer wakeups.
    /// The default value is 10 milliseconds.
    pub poll_slice: Duration,
    /// Send a Ping once nothing has been sent for this long. `None` disables
    /// keep-alive pings. The default value is 30 seconds.
    pub ping_interval: Option<Duration>,
    /// End the session when nothing has been received for this long. `None`
    /// (the default) never times out an otherwise healthy connection.
    pub inactivity_timeout: Option<Duration>,
    /// How long to wait for the peer's Close after sending ours.
    /// The default value is 5 seconds.
    pub close_timeout: Duration,
    /// Hard cap on queued outbound frames. Reaching it while output is paused
    /// ends the session. The default value is 512.
    pub max_queue_depth: usize,
    /// Depth below which producers blocked in `wait_out_space_avail` resume.
    /// The default value is 256.
    pub queue_low_water: usize,
    /// The maximum size of an incoming message. `None` means no size limit.
    /// The default value is 64 MiB.
    pub max_message_size: Option<usize>,
    /// The maximum size of a single incoming message frame. `None` means no
    /// size limit. The default value is 16 MiB.
    pub max_frame_size: Option<usize>,
    /// When set to `true`, the server will accept and handle unmasked frames
    /// from the client. Browsers always mask, so the default value is `false`.
    pub accept_unmasked_frames: bool,
    /// Whether the message trace starts enabled. The default value is `false`.
    pub msg_logging: bool,
    /// File the message trace is appended to. With `None` (the default) trace
    /// lines go to the `websock_engine::msgs` log target instead.
    pub msg_log_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
            poll_slice: Duration::from_millis(10),
            ping_interval: Some(Duration::from_secs(30)),
            inactivity_timeout: None,
            close_timeout: Duration::from_secs(5),
            max_queue_depth: 512,
            queue_low_water: 256,
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
            accept_unmasked_frames: false,
            msg_logging: false,
            msg_log_path: None,
        }
    }
}

impl SessionConfig {
    /// Set [`Self::tick_interval`].
    pub fn tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Set [`Self::poll_slice`].
    pub fn poll_slice(mut self, poll_slice: Duration) -> Self {
        self.poll_slice = poll_slice;
        self
    }

    /// Set [`Self::ping_interval`].
    pub fn ping_interval(mut self, ping_interval: Option<Duration>) -> Self {
        self.ping_interval = ping_interval;
        self
    }

    /// Set [`Self::inactivity_timeout`].
    pub fn inactivity_timeout(mut self, inactivity_timeout: Option<Duration>) -> Self {
        self.inactivity_timeout = inactivity_timeout;
        self
    }

    /// Set [`Self::close_timeout`].
    pub fn close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// Set [`Self::max_queue_depth`], moving the low watermark to half of it.
    pub fn max_queue_depth(mut self, max_queue_depth: usize) -> Self {
        self.max_queue_depth = max_queue_depth;
        self.queue_low_water = max_queue_depth / 2;
        self
    }

    /// Set [`Self::queue_low_water`].
    pub fn queue_low_water(mut self, queue_low_water: usize) -> Self {
        self.queue_low_water = queue_low_water;
        self
    }

    /// Set [`Self::max_message_size`].
    pub fn max_message_size(mut self, max_message_size: Option<usize>) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Set [`Self::max_frame_size`].
    pub fn max_frame_size(mut self, max_frame_size: Option<usize>) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Set [`Self::accept_unmasked_frames`].
    pub fn accept_unmasked_frames(mut self, accept_unmasked_frames: bool) -> Self {
        self.accept_unmasked_frames = accept_unmasked_frames;
        self
    }

    /// Set [`Self::msg_logging`] and [`Self::msg_log_path`].
    pub fn msg_logging(mut self, enabled: bool, path: Option<PathBuf>) -> Self {
        self.msg_logging = enabled;
        self.msg_log_path = path;
        self
    }

    /// Panic if values are invalid.
    pub(crate) fn assert_valid(&self) {
        assert!(self.max_queue_depth > 0, "max_queue_depth must be at least 1");
        assert!(
            self.queue_low_water < self.max_queue_depth,
            "queue_low_water ({}) must be less than max_queue_depth ({})",
            self.queue_low_water,
            self.max_queue_depth
        );
    }
}
