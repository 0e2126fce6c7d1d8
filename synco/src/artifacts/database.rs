use crate::meta::{FileSet, FileSetPayload};
use crate::session::TransferSession;
use crate::utils::errors::Result;
use crate::utils::human_bytes;
use synco_dump::{run_pipeline, DumpSource, PipelineOptions, SqlWriter};
use tracing::info;

pub const DB_DUMP_FILE_SET: &str = "dbDump";
pub const DB_DUMP_ARTIFACT: &str = "dump.sql.enc";

/// Run the dump pipeline into an encrypted SQL artifact and record it.
pub async fn export_database<S>(
    session: &mut TransferSession,
    source: S,
    options: PipelineOptions,
) -> Result<FileSet>
where
    S: DumpSource + 'static,
{
    let sink = session.encrypt_to_file(DB_DUMP_ARTIFACT)?;
    let cancel = session.cancel_token().clone();
    let (report, writer) = run_pipeline(source, SqlWriter::new(sink), options, cancel).await?;
    let size_bytes = writer.into_inner().finish()?;

    info!(
        tables = report.dump.tables,
        excluded = report.dump.tables_excluded,
        rows = report.dump.rows,
        statements = report.units_executed,
        size = %human_bytes(size_bytes),
        "Database exported"
    );

    let file_set = FileSet {
        name: DB_DUMP_FILE_SET.to_string(),
        payload: FileSetPayload::MysqlDump {
            file_name: DB_DUMP_ARTIFACT.to_string(),
            size_bytes,
        },
    };
    session.add_file_set(file_set.clone())?;
    Ok(file_set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_cipher;
    use crate::session::SessionOptions;
    use synco_dump::source::RowScan;
    use synco_dump::RowData;
    use tokio_util::sync::CancellationToken;

    /// In-memory source with a single `users` table.
    struct UsersSource;

    impl DumpSource for UsersSource {
        fn server_version(&self) -> synco_dump::Result<String> {
            Ok("test 1.0".to_string())
        }

        fn database_name(&self) -> synco_dump::Result<String> {
            Ok("shop".to_string())
        }

        fn tables(&self) -> synco_dump::Result<Vec<String>> {
            Ok(vec!["users".to_string()])
        }

        fn create_statement(&self, _table: &str) -> synco_dump::Result<String> {
            Ok("CREATE TABLE users (id INT, name TEXT)".to_string())
        }

        fn columns(&self, _table: &str) -> synco_dump::Result<Vec<String>> {
            Ok(vec!["id".to_string(), "name".to_string()])
        }

        fn scan_rows(
            &self,
            _scan: &RowScan<'_>,
            visit: &mut dyn FnMut(RowData) -> synco_dump::Result<()>,
        ) -> synco_dump::Result<u64> {
            visit(vec![Some(b"1".to_vec()), Some(b"Alice".to_vec())])?;
            visit(vec![None, Some(b"Bob".to_vec())])?;
            Ok(2)
        }
    }

    /// Serves enough rows to flush, then fails mid-table.
    struct FailingSource;

    impl DumpSource for FailingSource {
        fn server_version(&self) -> synco_dump::Result<String> {
            UsersSource.server_version()
        }

        fn database_name(&self) -> synco_dump::Result<String> {
            UsersSource.database_name()
        }

        fn tables(&self) -> synco_dump::Result<Vec<String>> {
            UsersSource.tables()
        }

        fn create_statement(&self, table: &str) -> synco_dump::Result<String> {
            UsersSource.create_statement(table)
        }

        fn columns(&self, table: &str) -> synco_dump::Result<Vec<String>> {
            UsersSource.columns(table)
        }

        fn scan_rows(
            &self,
            _scan: &RowScan<'_>,
            visit: &mut dyn FnMut(RowData) -> synco_dump::Result<()>,
        ) -> synco_dump::Result<u64> {
            for i in 0..2000 {
                visit(vec![Some(i.to_string().into_bytes()), Some(b"someone".to_vec())])?;
            }
            Err(synco_dump::DumpError::Database("connection lost".to_string()))
        }
    }

    async fn session(id: &str, web: &std::path::Path) -> TransferSession {
        let mut session = TransferSession::new(
            SessionOptions {
                identifier: id.to_string(),
                password: "pw".to_string(),
                scrypt_work_factor: Some(4),
                ..Default::default()
            },
            CancellationToken::new(),
        )
        .unwrap();
        session
            .with_framework_and_web_directory("test", web)
            .await
            .unwrap();
        session
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_export_leaves_no_artifact() {
        let web = tempfile::tempdir().unwrap();
        let mut session = session("db2", web.path()).await;
        let mut options = PipelineOptions::default();
        options.convert.batch_size = 1024;

        let err = export_database(&mut session, FailingSource, options)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection lost"), "{err}");
        assert!(!session.work_dir().unwrap().join(DB_DUMP_ARTIFACT).exists());
        assert!(session.meta().file_sets.is_empty());

        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_export_writes_encrypted_sql() {
        let web = tempfile::tempdir().unwrap();
        let mut session = TransferSession::new(
            SessionOptions {
                identifier: "db1".to_string(),
                password: "pw".to_string(),
                scrypt_work_factor: Some(4),
                ..Default::default()
            },
            CancellationToken::new(),
        )
        .unwrap();
        session
            .with_framework_and_web_directory("test", web.path())
            .await
            .unwrap();

        let file_set = export_database(&mut session, UsersSource, PipelineOptions::default())
            .await
            .unwrap();
        assert_eq!(file_set.name, "dbDump");
        assert_eq!(session.meta().file_sets.len(), 1);

        let sealed = std::fs::read(session.work_dir().unwrap().join(DB_DUMP_ARTIFACT)).unwrap();
        let sql = test_cipher("pw").decrypt_bytes(&sealed, DB_DUMP_ARTIFACT).unwrap();
        let sql = String::from_utf8(sql).unwrap();
        assert!(sql.contains("REPLACE INTO users(`id`,`name`) VALUES ('1','Alice'),(null,'Bob')"));
        assert_eq!(file_set.size_bytes(), sql.len() as u64);

        session.shutdown().await;
    }
}
