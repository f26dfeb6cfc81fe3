//! Unit and scenario tests, all running against scripted fakes: no real
//! screen, model, input device, or wall clock is touched.

mod support;

mod motion_tests;
mod stability_tests;
