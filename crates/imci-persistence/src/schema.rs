// Diesel schema shared by the SQLite and Postgres backends.
// Ids are UUID strings, timestamps epoch milliseconds (`*_ts`), JSON as Text.
use diesel::allow_tables_to_appear_in_same_query;

diesel::table! {
    users (id) {
        id -> Text,
        email -> Text,
        username -> Text,
        role -> Text,
        created_at_ts -> BigInt,
    }
}

diesel::table! {
    flows (id) {
        id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        status -> Text,
        created_by -> Nullable<Text>,
        created_at_ts -> BigInt,
        updated_at_ts -> BigInt,
        last_version_number -> Integer,
    }
}

diesel::table! {
    flow_versions (id) {
        id -> Text,
        flow_id -> Text,
        version_number -> Integer,
        status -> Text,
        entry_conditions -> Text,
        created_by -> Nullable<Text>,
        created_at_ts -> BigInt,
        published_at_ts -> Nullable<BigInt>,
        published_by -> Nullable<Text>,
    }
}

diesel::table! {
    nodes (id) {
        id -> Text,
        node_id -> Text,
        flow_version_id -> Text,
        node_type -> Text,
        content -> Text,
        node_order -> Integer,
        created_at_ts -> BigInt,
        updated_at_ts -> BigInt,
    }
}

diesel::table! {
    variables (id) {
        id -> Text,
        variable_id -> Text,
        name -> Text,
        variable_type -> Text,
        description -> Nullable<Text>,
        default_value -> Text,
        is_global -> Bool,
        flow_version_id -> Nullable<Text>,
        category -> Text,
        required -> Bool,
        created_by -> Nullable<Text>,
        created_at_ts -> BigInt,
        updated_at_ts -> BigInt,
    }
}

diesel::table! {
    conditions (id) {
        id -> Text,
        flow_version_id -> Text,
        variable_id -> Text,
        operator -> Text,
        value -> Text,
        condition_type -> Text,
        reference_id -> Nullable<Text>,
        logical_operator -> Nullable<Text>,
        group_id -> Nullable<Text>,
        created_at_ts -> BigInt,
    }
}

diesel::table! {
    diagnoses (id) {
        id -> Text,
        flow_version_id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        created_at_ts -> BigInt,
        updated_at_ts -> BigInt,
    }
}

diesel::table! {
    medications (id) {
        id -> Text,
        name -> Text,
        generic_name -> Nullable<Text>,
        category -> Nullable<Text>,
        unit -> Text,
        description -> Nullable<Text>,
        created_at_ts -> BigInt,
    }
}

diesel::table! {
    diagnosis_medications (id) {
        id -> Text,
        diagnosis_id -> Text,
        medication_id -> Text,
        dosage -> Text,
        duration -> Nullable<Text>,
        instructions -> Nullable<Text>,
        order_index -> Integer,
    }
}

diesel::table! {
    diagnosis_advice (id) {
        id -> Text,
        diagnosis_id -> Text,
        advice_text -> Text,
        priority -> Integer,
        category -> Nullable<Text>,
    }
}

diesel::table! {
    flow_analytics (id) {
        id -> Text,
        flow_id -> Text,
        flow_version_id -> Nullable<Text>,
        session_id -> Text,
        user_id -> Nullable<Text>,
        started_at_ts -> BigInt,
        completed_at_ts -> Nullable<BigInt>,
        is_finalized -> Bool,
        finalized_at_ts -> Nullable<BigInt>,
        total_nodes_visited -> Integer,
    }
}

diesel::table! {
    api_config (id) {
        id -> Text,
        api_key -> Nullable<Text>,
        updated_at_ts -> BigInt,
    }
}

allow_tables_to_appear_in_same_query!(users,
                                      flows,
                                      flow_versions,
                                      nodes,
                                      variables,
                                      conditions,
                                      diagnoses,
                                      medications,
                                      diagnosis_medications,
                                      diagnosis_advice,
                                      flow_analytics,
                                      api_config);
