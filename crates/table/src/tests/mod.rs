mod helpers;
mod key_tests;
mod row_tests;
mod schema_tests;
