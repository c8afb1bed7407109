//! File rows and the read-only catalog.

use async_trait::async_trait;
use unisphere_core::domain::{ClassNote, FileRecord, Instructor, NewFile, PastExam};
use unisphere_core::ports::{CatalogRepository, FileRepository, PortResult};

use super::{DbAdapter, FileRecordRow, FILE_COLUMNS};

#[async_trait]
impl FileRepository for DbAdapter {
    async fn insert_file(&self, file: NewFile) -> PortResult<FileRecord> {
        let sql = format!(
            "INSERT INTO files (name, file_path, file_url, size_bytes, mime_type, resource_type, \
                                resource_id, uploader_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            FILE_COLUMNS
        );
        let record = self
            .timed(
                format!("file {}", file.file_path),
                sqlx::query_as::<_, FileRecordRow>(&sql)
                    .bind(&file.name)
                    .bind(&file.file_path)
                    .bind(&file.file_url)
                    .bind(file.size_bytes)
                    .bind(&file.mime_type)
                    .bind(file.resource_type.as_str())
                    .bind(file.resource_id)
                    .bind(file.uploader_id)
                    .fetch_one(&self.pool),
            )
            .await?;
        record.to_domain()
    }

    async fn delete_file(&self, file_id: i64) -> PortResult<Option<FileRecord>> {
        let sql = format!("DELETE FROM files WHERE id = $1 RETURNING {}", FILE_COLUMNS);
        let record = self
            .timed(
                format!("file {}", file_id),
                sqlx::query_as::<_, FileRecordRow>(&sql)
                    .bind(file_id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        record.map(FileRecordRow::to_domain).transpose()
    }

    async fn list_community_files(&self, community_id: i64) -> PortResult<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {} FROM files \
             WHERE resource_id = $1 \
               AND resource_type IN ('CHAT_MESSAGE', 'COMMUNITY', 'COMMUNITY_PROFILE_PHOTO') \
             ORDER BY id",
            FILE_COLUMNS
        );
        let records = self
            .timed(
                format!("files of community {}", community_id),
                sqlx::query_as::<_, FileRecordRow>(&sql)
                    .bind(community_id)
                    .fetch_all(&self.pool),
            )
            .await?;
        records.into_iter().map(FileRecordRow::to_domain).collect()
    }
}

#[async_trait]
impl CatalogRepository for DbAdapter {
    async fn find_instructor(&self, instructor_id: i64) -> PortResult<Instructor> {
        let (id, user_id): (i64, i64) = self
            .timed(
                format!("instructor {}", instructor_id),
                sqlx::query_as("SELECT id, user_id FROM instructors WHERE id = $1")
                    .bind(instructor_id)
                    .fetch_one(&self.pool),
            )
            .await?;
        Ok(Instructor { id, user_id })
    }

    async fn find_past_exam(&self, exam_id: i64) -> PortResult<PastExam> {
        let (id, instructor_id): (i64, i64) = self
            .timed(
                format!("past exam {}", exam_id),
                sqlx::query_as("SELECT id, instructor_id FROM past_exams WHERE id = $1")
                    .bind(exam_id)
                    .fetch_one(&self.pool),
            )
            .await?;
        Ok(PastExam { id, instructor_id })
    }

    async fn find_class_note(&self, note_id: i64) -> PortResult<ClassNote> {
        let (id, uploader_id): (i64, i64) = self
            .timed(
                format!("class note {}", note_id),
                sqlx::query_as("SELECT id, uploader_id FROM class_notes WHERE id = $1")
                    .bind(note_id)
                    .fetch_one(&self.pool),
            )
            .await?;
        Ok(ClassNote { id, uploader_id })
    }
}
