// Table definitions for the skywatch database.
//
// Schema migrations are managed out-of-band; `sql/schema.sql` carries the
// reference DDL including the indexes the repositories rely on.

diesel::table! {
    flight_samples (id) {
        id -> Int8,
        callsign -> Varchar,
        pilot_id -> Int8,
        observed_at -> Timestamptz,
        latitude -> Float8,
        longitude -> Float8,
        altitude_ft -> Int4,
        groundspeed_kt -> Nullable<Int4>,
        heading_deg -> Nullable<Int4>,
        departure_icao -> Varchar,
        arrival_icao -> Varchar,
        aircraft_type -> Nullable<Varchar>,
        flight_rules -> Nullable<Varchar>,
        route -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    flight_samples_archive (id) {
        id -> Int8,
        callsign -> Varchar,
        pilot_id -> Int8,
        observed_at -> Timestamptz,
        latitude -> Float8,
        longitude -> Float8,
        altitude_ft -> Int4,
        groundspeed_kt -> Nullable<Int4>,
        heading_deg -> Nullable<Int4>,
        departure_icao -> Varchar,
        arrival_icao -> Varchar,
        aircraft_type -> Nullable<Varchar>,
        flight_rules -> Nullable<Varchar>,
        route -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    controller_samples (id) {
        id -> Int8,
        callsign -> Varchar,
        cid -> Int8,
        observed_at -> Timestamptz,
        frequency -> Varchar,
        name -> Nullable<Varchar>,
        rating -> Int4,
        facility -> Int4,
        latitude -> Nullable<Float8>,
        longitude -> Nullable<Float8>,
        controller_type -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    transceiver_samples (id) {
        id -> Int8,
        entity_type -> Varchar,
        cid -> Int8,
        callsign -> Varchar,
        observed_at -> Timestamptz,
        frequency_hz -> Int8,
        latitude -> Nullable<Float8>,
        longitude -> Nullable<Float8>,
        height_msl_m -> Nullable<Float8>,
    }
}

diesel::table! {
    sector_occupancies (id) {
        id -> Int8,
        callsign -> Varchar,
        pilot_id -> Int8,
        sector_name -> Varchar,
        entry_at -> Timestamptz,
        entry_lat -> Float8,
        entry_lon -> Float8,
        entry_altitude_ft -> Int4,
        exit_at -> Nullable<Timestamptz>,
        exit_lat -> Nullable<Float8>,
        exit_lon -> Nullable<Float8>,
        exit_altitude_ft -> Nullable<Int4>,
        duration_seconds -> Nullable<Int8>,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    interactions (id) {
        id -> Int8,
        flight_callsign -> Varchar,
        flight_pilot_id -> Int8,
        controller_callsign -> Varchar,
        controller_type -> Varchar,
        distance_nm -> Float8,
        proximity_nm -> Float8,
        observed_at -> Timestamptz,
    }
}

diesel::table! {
    flight_summaries (id) {
        id -> Int8,
        callsign -> Varchar,
        pilot_id -> Int8,
        departure_icao -> Varchar,
        arrival_icao -> Varchar,
        aircraft_type -> Nullable<Varchar>,
        total_samples -> Int8,
        first_seen_at -> Timestamptz,
        last_seen_at -> Timestamptz,
        total_distance_nm -> Float8,
        avg_groundspeed_kt -> Float8,
        max_altitude_ft -> Int4,
        sectors_visited -> Jsonb,
        controller_interactions -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    flight_samples,
    flight_samples_archive,
    controller_samples,
    transceiver_samples,
    sector_occupancies,
    interactions,
    flight_summaries,
);
