//! Diesel table definitions for the PostgreSQL schema.
//!
//! Keep in step with `backend/migrations`; `diesel print-schema` regenerates
//! the column lists from a live database.

diesel::table! {
    /// Prepaid balances, tiers, and monthly counters.
    accounts (username) {
        username -> Varchar,
        tier -> Varchar,
        /// Balance in micro-credits.
        balance_micros -> Int8,
        data_used_bytes -> Int8,
        data_limit_bytes -> Int8,
        pubsub_messages_sent -> Int8,
        pubsub_messages_limit -> Int8,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Merged storage records keyed by (content_hash, network).
    uploads (content_hash, network) {
        content_hash -> Varchar,
        network -> Varchar,
        kind -> Varchar,
        hold_months -> Int4,
        gc_deadline -> Timestamptz,
        uploaders -> Array<Text>,
        encrypted -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Per-user custody reservations.
    upload_owners (content_hash, network, username) {
        content_hash -> Varchar,
        network -> Varchar,
        username -> Varchar,
        reserved_at -> Timestamptz,
    }
}

diesel::table! {
    /// Durable queue of encoded pin instructions.
    pin_messages (id) {
        id -> Int8,
        body -> Bytea,
        delivery_count -> Int4,
        leased_until -> Nullable<Timestamptz>,
        dead_lettered_at -> Nullable<Timestamptz>,
        dead_letter_reason -> Nullable<Text>,
        enqueued_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(accounts, uploads, upload_owners, pin_messages);
