use serde::Deserialize;
use tracing::{Metadata, Subscriber};
use tracing_subscriber::{
    fmt::{self, format, FormattedFields},
    layer::{Context, Layer},
    registry::LookupSpan,
};

/// Basic tracing configuration
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum Style {
    /// Pretty print
    Pretty,
    /// JSON
    Json,
    /// Compact
    Compact,
    /// Default style
    #[serde(other)]
    #[default]
    Full,
}

/// Unification of the fmt Subscriber formatting styles
///
/// Wrapper around the 4 formatting layers so callers can pick one from
/// configuration.
#[derive(Debug)]
pub enum LogOutputLayer<S> {
    /// See docs for `Style::Pretty`
    Pretty(fmt::Layer<S, format::Pretty, format::Format<format::Pretty>>),
    /// See docs for `Style::Json`
    Json(fmt::Layer<S, format::JsonFields, format::Format<format::Json>>),
    /// See docs for `Style::Compact`
    Compact(fmt::Layer<S, format::DefaultFields, format::Format<format::Compact>>),
    /// See docs for `Style::Full`
    Full(fmt::Layer<S>),
}

impl<S> From<Style> for LogOutputLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn from(style: Style) -> Self {
        match style {
            Style::Pretty => Self::Pretty(fmt::layer().pretty()),
            Style::Json => Self::Json(fmt::layer().json()),
            Style::Compact => Self::Compact(fmt::layer().compact()),
            Style::Full => Self::Full(fmt::layer()),
        }
    }
}

impl<S> Layer<S> for LogOutputLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    fmt::Layer<S, format::Pretty, format::Format<format::Pretty>>: Layer<S>,
    fmt::Layer<S, format::JsonFields, format::Format<format::Json>>: Layer<S>,
    fmt::Layer<S, format::DefaultFields, format::Format<format::Compact>>: Layer<S>,
    fmt::Layer<S>: Layer<S>,
    FormattedFields<format::JsonFields>: 'static,
{
    fn on_layer(&mut self, subscriber: &mut S) {
        match self {
            LogOutputLayer::Pretty(inner) => inner.on_layer(subscriber),
            LogOutputLayer::Json(inner) => inner.on_layer(subscriber),
            LogOutputLayer::Compact(inner) => inner.on_layer(subscriber),
            LogOutputLayer::Full(inner) => inner.on_layer(subscriber),
        }
    }

    fn enabled(&self, metadata: &Metadata<'_>, ctx: Context<'_, S>) -> bool {
        match self {
            LogOutputLayer::Pretty(inner) => inner.enabled(metadata, ctx),
            LogOutputLayer::Json(inner) => inner.enabled(metadata, ctx),
            LogOutputLayer::Compact(inner) => inner.enabled(metadata, ctx),
            LogOutputLayer::Full(inner) => inner.enabled(metadata, ctx),
        }
    }

    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: Context<'_, S>,
    ) {
        match self {
            LogOutputLayer::Pretty(inner) => inner.on_new_span(attrs, id, ctx),
            LogOutputLayer::Json(inner) => inner.on_new_span(attrs, id, ctx),
            LogOutputLayer::Compact(inner) => inner.on_new_span(attrs, id, ctx),
            LogOutputLayer::Full(inner) => inner.on_new_span(attrs, id, ctx),
        }
    }

    fn on_record(
        &self,
        span: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        ctx: Context<'_, S>,
    ) {
        match self {
            LogOutputLayer::Pretty(inner) => inner.on_record(span, values, ctx),
            LogOutputLayer::Json(inner) => inner.on_record(span, values, ctx),
            LogOutputLayer::Compact(inner) => inner.on_record(span, values, ctx),
            LogOutputLayer::Full(inner) => inner.on_record(span, values, ctx),
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        match self {
            LogOutputLayer::Pretty(inner) => inner.on_event(event, ctx),
            LogOutputLayer::Json(inner) => inner.on_event(event, ctx),
            LogOutputLayer::Compact(inner) => inner.on_event(event, ctx),
            LogOutputLayer::Full(inner) => inner.on_event(event, ctx),
        }
    }

    fn on_enter(&self, id: &tracing::span::Id, ctx: Context<'_, S>) {
        match self {
            LogOutputLayer::Pretty(inner) => inner.on_enter(id, ctx),
            LogOutputLayer::Json(inner) => inner.on_enter(id, ctx),
            LogOutputLayer::Compact(inner) => inner.on_enter(id, ctx),
            LogOutputLayer::Full(inner) => inner.on_enter(id, ctx),
        }
    }

    fn on_exit(&self, id: &tracing::span::Id, ctx: Context<'_, S>) {
        match self {
            LogOutputLayer::Pretty(inner) => inner.on_exit(id, ctx),
            LogOutputLayer::Json(inner) => inner.on_exit(id, ctx),
            LogOutputLayer::Compact(inner) => inner.on_exit(id, ctx),
            LogOutputLayer::Full(inner) => inner.on_exit(id, ctx),
        }
    }

    fn on_close(&self, id: tracing::span::Id, ctx: Context<'_, S>) {
        match self {
            LogOutputLayer::Pretty(inner) => inner.on_close(id, ctx),
            LogOutputLayer::Json(inner) => inner.on_close(id, ctx),
            LogOutputLayer::Compact(inner) => inner.on_close(id, ctx),
            LogOutputLayer::Full(inner) => inner.on_close(id, ctx),
        }
    }
}
