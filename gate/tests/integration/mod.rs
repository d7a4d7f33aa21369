mod deadline_test;
mod store_retry_test;
mod tracker_test;
mod validation_test;
