//! Diesel table definitions for the coverage platform.
//!
//! Tables: cov_projects, cov_builds, cov_jobs.

diesel::table! {
    cov_projects (id) {
        id -> Int8,
        name -> Varchar,
        repo_name -> Varchar,
        default_branch -> Varchar,
        coverage -> Nullable<Float8>,
        active -> Bool,
        create_date -> Nullable<Timestamptz>,
        write_date -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    cov_builds (id) {
        id -> Int8,
        project_id -> Int8,
        build_number -> Int4,
        branch -> Varchar,
        commit_sha -> Nullable<Varchar>,
        committer_name -> Nullable<Varchar>,
        committer_email -> Nullable<Varchar>,
        commit_message -> Nullable<Text>,
        coverage -> Nullable<Float8>,
        completed -> Bool,
        previous_build_id -> Nullable<Int8>,
        previous_coverage -> Nullable<Float8>,
        build_started_at -> Timestamptz,
        service_name -> Nullable<Varchar>,
        service_job_id -> Nullable<Varchar>,
        service_job_pull_request -> Nullable<Varchar>,
        create_date -> Nullable<Timestamptz>,
        write_date -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    cov_jobs (id) {
        id -> Int8,
        build_id -> Int8,
        service_job_id -> Nullable<Varchar>,
        coverage -> Nullable<Float8>,
        create_date -> Nullable<Timestamptz>,
        write_date -> Nullable<Timestamptz>,
    }
}

// Foreign key relationships. previous_build_id is a plain column on purpose:
// the link is fixed at creation and never joined eagerly.
diesel::joinable!(cov_builds -> cov_projects (project_id));
diesel::joinable!(cov_jobs -> cov_builds (build_id));

diesel::allow_tables_to_appear_in_same_query!(cov_projects, cov_builds, cov_jobs,);
