//! Static file serving through the path validator.

use axum::{body::Body, http::Request, response::Response};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::sandbox::{PathError, PathValidator};

/// Serve a root-relative file. Anything the validator refuses, and anything
/// that is not a regular file, is answered with a plain 404 that does not
/// echo the attempted path.
pub async fn serve_file(
    validator: &PathValidator,
    relative: &str,
    request: Request<Body>,
) -> Result<Response, PathError> {
    let path = validator.resolve(relative)?;
    let meta = tokio::fs::metadata(&path)
        .await
        .map_err(|_| PathError::NotFound)?;
    if !meta.is_file() {
        return Err(PathError::NotFound);
    }

    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => Ok(response.map(Body::new)),
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn serves_files_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("public")).unwrap();
        std::fs::write(dir.path().join("public/site.css"), "body{}").unwrap();
        let v = PathValidator::new(dir.path()).unwrap();

        let req = Request::builder().uri("/public/site.css").body(Body::empty()).unwrap();
        let res = serve_file(&v, "public/site.css", req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["content-type"], "text/css");
    }

    #[tokio::test]
    async fn refuses_directories_and_escapes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("public")).unwrap();
        let v = PathValidator::new(dir.path()).unwrap();

        let req = Request::builder().body(Body::empty()).unwrap();
        assert!(matches!(
            serve_file(&v, "public", req).await,
            Err(PathError::NotFound)
        ));
        let req = Request::builder().body(Body::empty()).unwrap();
        assert!(matches!(
            serve_file(&v, "public/../../etc/passwd", req).await,
            Err(PathError::Escape)
        ));
    }
}
