diesel::table! {
    departments (id) {
        id -> Uuid,
        name -> Varchar,
        sla_accept_minutes -> Int4,
    }
}

diesel::table! {
    tickets (id) {
        id -> Uuid,
        source -> Varchar,
        subject -> Text,
        description -> Text,
        language -> Nullable<Varchar>,
        category -> Nullable<Varchar>,
        subcategory -> Nullable<Varchar>,
        department_id -> Nullable<Uuid>,
        priority -> Varchar,
        status -> Varchar,
        client_type -> Nullable<Varchar>,
        summary -> Nullable<Text>,
        assigned_to -> Nullable<Varchar>,
        auto_resolved -> Bool,
        need_on_site -> Bool,
        classification_confidence -> Nullable<Float8>,
        sla_accept_deadline -> Nullable<Timestamptz>,
        sla_remote_deadline -> Nullable<Timestamptz>,
        first_response_at -> Nullable<Timestamptz>,
        closed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_messages (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        role -> Varchar,
        content -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_history (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        field -> Varchar,
        old_value -> Nullable<Text>,
        new_value -> Nullable<Text>,
        reason -> Nullable<Text>,
        changed_at -> Timestamptz,
    }
}

diesel::table! {
    interactions (id) {
        id -> Uuid,
        session_id -> Nullable<Varchar>,
        source -> Varchar,
        message -> Text,
        answer -> Text,
        confidence -> Float8,
        max_similarity -> Float8,
        category -> Nullable<Varchar>,
        ticket_created -> Bool,
        ticket_id -> Nullable<Uuid>,
        response_time_ms -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    classification_feedback (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        predicted_category -> Nullable<Varchar>,
        actual_category -> Nullable<Varchar>,
        predicted_department_id -> Nullable<Uuid>,
        actual_department_id -> Nullable<Uuid>,
        predicted_priority -> Nullable<Varchar>,
        actual_priority -> Nullable<Varchar>,
        is_correct -> Bool,
        comment -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    routing_errors (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        initial_department_id -> Nullable<Uuid>,
        corrected_department_id -> Nullable<Uuid>,
        initial_category -> Nullable<Varchar>,
        corrected_category -> Nullable<Varchar>,
        error_type -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    response_times (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        response_time_seconds -> Float8,
        response_type -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(tickets -> departments (department_id));
diesel::joinable!(ticket_messages -> tickets (ticket_id));
diesel::joinable!(ticket_history -> tickets (ticket_id));

diesel::allow_tables_to_appear_in_same_query!(
    departments,
    tickets,
    ticket_messages,
    ticket_history,
    interactions,
    classification_feedback,
    routing_errors,
    response_times,
);
