// self
use crate::{_prelude::*, obs::FlowKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = ::tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// A span builder used by session flows.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	#[cfg(feature = "tracing")]
	span: ::tracing::Span,
}
impl FlowSpan {
	/// Creates a new span tagged with the provided flow kind + stage.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = ::tracing::info_span!("session_broker.flow", flow = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use ::tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

macro_rules! obs_debug {
	($($arg:tt)+) => {
		#[cfg(feature = "tracing")]
		{
			::tracing::debug!(target: "session_broker", $($arg)+);
		}
	};
}
macro_rules! obs_info {
	($($arg:tt)+) => {
		#[cfg(feature = "tracing")]
		{
			::tracing::info!(target: "session_broker", $($arg)+);
		}
	};
}
macro_rules! obs_warn {
	($($arg:tt)+) => {
		#[cfg(feature = "tracing")]
		{
			::tracing::warn!(target: "session_broker", $($arg)+);
		}
	};
}
pub(crate) use {obs_debug as debug, obs_info as info, obs_warn as warn};

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = FlowSpan::new(FlowKind::Refresh, "instrument_wraps_future");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}

	#[test]
	fn event_macros_expand_in_statement_position() {
		let attempt = 2_u32;

		crate::obs::debug!(attempt = attempt, "debug event");
		crate::obs::info!(attempt = attempt, "info event");
		crate::obs::warn!(attempt = attempt, "warn event");
	}
}
