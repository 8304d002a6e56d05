// Background task bodies.  Each runs on its own named std thread (a FreeRTOS
// task on the device).

pub mod dispatch;
