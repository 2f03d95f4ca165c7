//! The `config` module provides a generic mechanism for loading and managing
//! request-scoped configuration.
//!
//! # Design Overview
//!
//! This module is centered around two abstractions:
//!
//! - The [`RequestConfigValue`] trait, used to associate a config key type with its value type.
//! - The [`RequestConfig`] struct, which wraps an optional value of the type linked via
//!   [`RequestConfigValue`].
//!
//! Under the hood, the [`RequestConfig`] struct holds a single value for the associated config
//! type. This value can be conveniently accessed, inserted, or mutated using [`http::Extensions`],
//! enabling type-safe configuration storage and retrieval on a per-request basis.
//!
//! # Motivation
//!
//! The key design benefit is the ability to store multiple config types—potentially even with the
//! same value type (e.g., [`std::time::Duration`])—without code duplication or ambiguity. By
//! leveraging trait association, each config key is distinct at the type level, while code for
//! storage and access remains totally generic.
//!
//! # Usage
//!
//! Implement [`RequestConfigValue`] for any marker type you wish to use as a config key,
//! specifying the associated value type. Then use [`RequestConfig<T>`] in [`Extensions`]
//! to set or retrieve config values for each key type in a uniform way.

use http::Extensions;

/// Associate a marker key type with its associated value type stored in [`http::Extensions`].
/// Implement this trait for unit/marker types to declare the concrete `Value` used for that key.
pub(crate) trait RequestConfigValue: Clone + 'static {
    type Value: Clone + Send + Sync + 'static;
}

/// Typed wrapper that holds an optional configuration value for a given marker key `T`.
/// Instances of [`RequestConfig<T>`] are intended to be inserted into [`http::Extensions`].
#[derive(Clone, Copy)]
pub(crate) struct RequestConfig<T: RequestConfigValue>(Option<T::Value>);

impl<T: RequestConfigValue> Default for RequestConfig<T> {
    #[inline]
    fn default() -> Self {
        RequestConfig(None)
    }
}

impl<T> RequestConfig<T>
where
    T: RequestConfigValue,
{
    /// Creates a new `RequestConfig` with the provided value.
    #[inline]
    pub(crate) const fn new(v: Option<T::Value>) -> Self {
        RequestConfig(v)
    }

    /// Returns a reference to the inner value of this request-scoped configuration.
    #[inline]
    pub(crate) const fn as_ref(&self) -> Option<&T::Value> {
        self.0.as_ref()
    }

    /// Retrieve the value from the request-scoped configuration.
    ///
    /// If the request specifies a value, use that value; otherwise, attempt to retrieve it from the
    /// current instance (typically a client instance).
    #[inline]
    pub(crate) fn fetch<'a>(&'a self, ext: &'a Extensions) -> Option<&'a T::Value> {
        ext.get::<RequestConfig<T>>()
            .and_then(Self::as_ref)
            .or(self.as_ref())
    }

    /// Stores this value into the given [`http::Extensions`], if a value of the same type is not
    /// already present.
    ///
    /// This method checks whether the provided [`http::Extensions`] contains a
    /// [`RequestConfig<T>`]. If not, it clones the current value and inserts it into the
    /// extensions. If a value already exists, the method does nothing.
    #[inline]
    pub(crate) fn store<'a>(&'a self, ext: &'a mut Extensions) -> &'a mut Option<T::Value> {
        &mut ext.get_or_insert_with(|| self.clone()).0
    }

    /// Loads the internal value from the provided [`http::Extensions`], if present.
    ///
    /// This method attempts to remove a value of type [`RequestConfig<T>`] from the provided
    /// [`http::Extensions`]. If such a value exists, the current internal value is replaced with
    /// the removed value. If not, the internal value remains unchanged.
    #[inline]
    pub(crate) fn load(&mut self, ext: &mut Extensions) -> Option<&T::Value> {
        if let Some(value) = RequestConfig::<T>::remove(ext) {
            self.0.replace(value);
        }
        self.as_ref()
    }

    /// Returns an immutable reference to the stored value from the given [`http::Extensions`], if
    /// present.
    ///
    /// Internally fetches [`RequestConfig<T>`] and returns a reference to its inner value, if set.
    #[inline]
    pub(crate) fn get(ext: &Extensions) -> Option<&T::Value> {
        ext.get::<RequestConfig<T>>()?.0.as_ref()
    }

    /// Returns a mutable reference to the inner value in [`http::Extensions`], inserting a default
    /// if missing.
    ///
    /// This ensures a [`RequestConfig<T>`] exists and returns a mutable reference to its inner
    /// `Option<T::Value>`.
    #[inline]
    pub(crate) fn get_mut(ext: &mut Extensions) -> &mut Option<T::Value> {
        &mut ext.get_or_insert_default::<RequestConfig<T>>().0
    }

    /// Removes and returns the stored value from the given [`http::Extensions`], if present.
    ///
    /// This consumes the [`RequestConfig<T>`] entry and extracts its inner value.
    #[inline]
    pub(crate) fn remove(ext: &mut Extensions) -> Option<T::Value> {
        ext.remove::<RequestConfig<T>>()?.0
    }
}

/// Implements [`RequestConfigValue`] for a given type.
macro_rules! impl_request_config_value {
    ($type:ty) => {
        impl crate::config::RequestConfigValue for $type {
            type Value = Self;
        }
    };
    ($type:ty, $value:ty) => {
        impl crate::config::RequestConfigValue for $type {
            type Value = $value;
        }
    };
}

pub(crate) use impl_request_config_value;

// ===== concrete per-request config keys =====

use std::{
    borrow::Cow,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    time::Duration,
};

use http::Version;

/// Per-request overrides for the local bind address / interface used to dial
/// the connection (set via `RequestBuilder::local_address`/`local_addresses`/
/// `interface`).
#[derive(Clone, Debug, Default)]
pub(crate) struct TcpConnectOptions {
    local_address_ipv4: Option<Ipv4Addr>,
    local_address_ipv6: Option<Ipv6Addr>,
    #[cfg(any(
        target_os = "android",
        target_os = "fuchsia",
        target_os = "illumos",
        target_os = "ios",
        target_os = "linux",
        target_os = "macos",
        target_os = "solaris",
        target_os = "tvos",
        target_os = "visionos",
        target_os = "watchos",
    ))]
    interface: Option<Cow<'static, str>>,
}

impl TcpConnectOptions {
    pub(crate) fn set_local_address(&mut self, addr: Option<IpAddr>) {
        match addr {
            Some(IpAddr::V4(v4)) => self.local_address_ipv4 = Some(v4),
            Some(IpAddr::V6(v6)) => self.local_address_ipv6 = Some(v6),
            None => {
                self.local_address_ipv4 = None;
                self.local_address_ipv6 = None;
            }
        }
    }

    pub(crate) fn set_local_addresses<V4, V6>(&mut self, ipv4: V4, ipv6: V6)
    where
        V4: Into<Option<Ipv4Addr>>,
        V6: Into<Option<Ipv6Addr>>,
    {
        self.local_address_ipv4 = ipv4.into();
        self.local_address_ipv6 = ipv6.into();
    }

    #[cfg(any(
        target_os = "android",
        target_os = "fuchsia",
        target_os = "illumos",
        target_os = "ios",
        target_os = "linux",
        target_os = "macos",
        target_os = "solaris",
        target_os = "tvos",
        target_os = "visionos",
        target_os = "watchos",
    ))]
    pub(crate) fn set_interface<I: Into<Cow<'static, str>>>(&mut self, interface: I) {
        self.interface = Some(interface.into());
    }

    pub(crate) fn local_address_ipv4(&self) -> Option<Ipv4Addr> {
        self.local_address_ipv4
    }

    pub(crate) fn local_address_ipv6(&self) -> Option<Ipv6Addr> {
        self.local_address_ipv6
    }

    #[cfg(any(
        target_os = "android",
        target_os = "fuchsia",
        target_os = "illumos",
        target_os = "ios",
        target_os = "linux",
        target_os = "macos",
        target_os = "solaris",
        target_os = "tvos",
        target_os = "visionos",
        target_os = "watchos",
    ))]
    pub(crate) fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }
}

/// Per-request overrides that don't fit the other, more specific, config
/// keys: the enforced HTTP version, a per-request proxy, and the TCP connect
/// options above.
#[derive(Clone, Debug, Default)]
pub(crate) struct RequestLayerOptions {
    enforced_version: Option<Version>,
    proxy_matcher: Option<crate::proxy::Matcher>,
    tcp_connect_opts: TcpConnectOptions,
}

impl RequestLayerOptions {
    pub(crate) fn enforced_version(&self) -> Option<Version> {
        self.enforced_version
    }

    pub(crate) fn enforced_version_mut(&mut self) -> &mut Option<Version> {
        &mut self.enforced_version
    }

    pub(crate) fn proxy_matcher(&self) -> Option<&crate::proxy::Matcher> {
        self.proxy_matcher.as_ref()
    }

    pub(crate) fn proxy_matcher_mut(&mut self) -> &mut Option<crate::proxy::Matcher> {
        &mut self.proxy_matcher
    }

    pub(crate) fn tcp_connect_opts(&self) -> &TcpConnectOptions {
        &self.tcp_connect_opts
    }

    pub(crate) fn tcp_connect_opts_mut(&mut self) -> &mut TcpConnectOptions {
        &mut self.tcp_connect_opts
    }
}

impl_request_config_value!(RequestLayerOptions);

/// Per-request original (as-sent-on-the-wire) header casing overrides.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RequestOrigHeaderMap;

impl_request_config_value!(RequestOrigHeaderMap, crate::header::OrigHeaderMap);

/// Whether the client's default headers should be merged onto this request.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RequestDefaultHeaders;

impl_request_config_value!(RequestDefaultHeaders, bool);

/// Per-request redirect policy override.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RequestRedirectPolicy;

impl_request_config_value!(RequestRedirectPolicy, crate::redirect::Policy);

/// Per-request total/read timeout overrides.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct TimeoutOptions {
    total: Option<Duration>,
    read: Option<Duration>,
}

impl TimeoutOptions {
    pub(crate) fn total_timeout(&mut self, timeout: Duration) {
        self.total = Some(timeout);
    }

    pub(crate) fn read_timeout(&mut self, timeout: Duration) {
        self.read = Some(timeout);
    }

    pub(crate) fn total(&self) -> Option<Duration> {
        self.total
    }

    pub(crate) fn read(&self) -> Option<Duration> {
        self.read
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct RequestTimeoutOptions;

impl_request_config_value!(RequestTimeoutOptions, TimeoutOptions);
