use super::*;

impl sansio::Protocol<InboundStun, (), ()> for IceSession {
    type Rout = ();
    type Wout = Transmit;
    type Eout = SessionEvent;
    type Error = Error;
    type Time = Instant;

    fn handle_read(&mut self, msg: InboundStun) -> std::result::Result<(), Self::Error> {
        self.handle_inbound(msg)
    }

    fn poll_read(&mut self) -> Option<Self::Rout> {
        None
    }

    fn handle_write(&mut self, _msg: ()) -> std::result::Result<(), Self::Error> {
        Ok(())
    }

    fn poll_write(&mut self) -> Option<Self::Wout> {
        self.transmits.pop_front()
    }

    fn handle_event(&mut self, _evt: ()) -> std::result::Result<(), Self::Error> {
        Ok(())
    }

    fn poll_event(&mut self) -> Option<Self::Eout> {
        self.events.pop_front()
    }

    fn handle_timeout(&mut self, now: Self::Time) -> std::result::Result<(), Self::Error> {
        if self.next_pacing.is_some_and(|at| at <= now) {
            self.pacing_tick(now);
        }

        for s in 0..self.streams.len() {
            let stream = &self.streams[s];
            if stream.next_dispatch.is_some_and(|at| at <= now) {
                let epoch = stream.dispatcher_epoch;
                self.dispatch_tick(s, epoch, now);
            }
        }
        Ok(())
    }

    fn poll_timeout(&mut self) -> Option<Self::Time> {
        self.streams
            .iter()
            .filter_map(|s| s.next_dispatch)
            .chain(self.next_pacing)
            .min()
    }

    fn close(&mut self) -> std::result::Result<(), Self::Error> {
        self.close_session();
        Ok(())
    }
}
