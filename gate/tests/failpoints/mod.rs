mod tracker_test;
