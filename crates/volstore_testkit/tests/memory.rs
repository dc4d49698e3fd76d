//! Conformance of the memory backend.

volstore_testkit::conformance_tests!(volstore_testkit::TestSession::memory());
