use crate::{
    auth::CurrentUser,
    data::{StudentFilter, student::Student},
    error::{MalformedStudentIdSnafu, MatriculaResult},
    routes::{Data, json_body},
    state::MatriculaState,
};
use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde_json::Value;
use snafu::ResultExt;
use uuid::Uuid;

fn parse_id(id: String) -> MatriculaResult<Uuid> {
    Uuid::parse_str(&id).context(MalformedStudentIdSnafu { original: id })
}

pub async fn get_students(
    State(state): State<MatriculaState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<StudentFilter>,
) -> MatriculaResult<Json<Data<Vec<Student>>>> {
    let students = state.students().list(&user, &filter).await?;
    Ok(Data::json(students))
}

pub async fn get_student(
    State(state): State<MatriculaState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> MatriculaResult<Json<Data<Student>>> {
    let student = state.students().get(&user, parse_id(id)?).await?;
    Ok(Data::json(student))
}

pub async fn post_student(
    State(state): State<MatriculaState>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<Value>, JsonRejection>,
) -> MatriculaResult<(StatusCode, Json<Data<Student>>)> {
    let body = json_body(body)?;
    let student = state.students().create(&user, &body).await?;
    Ok((StatusCode::CREATED, Data::json(student)))
}

pub async fn put_student(
    State(state): State<MatriculaState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> MatriculaResult<Json<Data<Student>>> {
    let id = parse_id(id)?;
    let body = json_body(body)?;
    let student = state.students().update(&user, id, &body).await?;
    Ok(Data::json(student))
}

pub async fn delete_student(
    State(state): State<MatriculaState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> MatriculaResult<StatusCode> {
    state.students().delete(&user, parse_id(id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn patch_student_status(
    State(state): State<MatriculaState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> MatriculaResult<Json<Data<Student>>> {
    let id = parse_id(id)?;
    let body = json_body(body)?;
    let student = state.students().update_status(&user, id, &body).await?;
    Ok(Data::json(student))
}
