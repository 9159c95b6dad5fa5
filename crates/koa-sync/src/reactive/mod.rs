//! Reactive layer: change notifications over any `LocalStore`.
//!
//! [`ReactiveStore`] wraps a store and publishes a [`ChangeEvent`] on its
//! [`EventBus`] after every successful write. Subscribers can listen to one
//! table or to all of them; presentation code re-reads the table when
//! notified, which is how live queries stay current.
//!
//! - [`event`]: [`ChangeEvent`] enum.
//! - [`event_bus`]: table-keyed pub/sub ([`EventBus`]).
//! - [`store`]: [`ReactiveStore<S>`] and [`Subscription`].

pub mod event;
pub mod event_bus;
pub mod store;

pub use event::ChangeEvent;
pub use event_bus::{EventBus, ListenerId};
pub use store::{ReactiveStore, Subscription};
