//! Conformance of the SQLite backend over a private in-memory database.

volstore_testkit::conformance_tests!(volstore_testkit::TestSession::memory_db());

mod soft_deletes {
    volstore_testkit::conformance_tests!(volstore_testkit::TestSession::memory_db_soft_deletes());
}
